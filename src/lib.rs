#![forbid(unsafe_code)]

//! Pervigil: an unattended host-monitoring daemon.
//!
//! Three independent monitors report state transitions to a chat webhook:
//! 1. **NIC thermal** - hysteresis state machine that throttles link speed when hot
//! 2. **Log watch** - tails a log file and alerts on error/warning patterns
//! 3. **Daily cost** - polls a billing API and alerts on spend thresholds
//!
//! # Library usage
//!
//! ```rust,no_run
//! use pervigil::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use pervigil::core::config::Config;
//! use pervigil::monitor::thermal::{NicMonitor, NicThresholds};
//! ```

pub mod prelude;

pub mod billing;
pub mod core;
pub mod daemon;
pub mod monitor;
pub mod platform;
pub mod sensors;
