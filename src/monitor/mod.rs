//! Monitors: thermal and cost hysteresis state machines, the log classifier,
//! and the pieces they lean on (state stores, speed control, suppression).

pub mod cost;
pub mod log_reader;
pub mod logwatch;
pub mod speed;
pub mod state;
pub mod suppress;
pub mod thermal;
