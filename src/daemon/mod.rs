//! Daemon subsystem: webhook notifications, the timer scheduler, and signal
//! handling.

pub mod notifications;
#[cfg(feature = "daemon")]
pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;
