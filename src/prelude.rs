//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use pervigil::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{PervigilError, Result};

// Platform
pub use crate::platform::system::{OsSystem, SystemAccess};

// Sensors
pub use crate::sensors::{NicTempSource, SensorReader, TempReading};

// Monitors
pub use crate::monitor::cost::{CostMonitor, CostStateData, CostStateStore, CostThresholds};
pub use crate::monitor::log_reader::{FileLogReader, LogReader};
pub use crate::monitor::logwatch::{LogMonitor, LogPatterns, ProcessResult};
pub use crate::monitor::speed::{EthtoolSpeedController, SpeedController};
pub use crate::monitor::state::{FileCostStateStore, FileStateStore, Level};
pub use crate::monitor::suppress::ErrorSuppressor;
pub use crate::monitor::thermal::{MonitorState, NicMonitor, NicThresholds, StateStore};

// Billing
pub use crate::billing::{BillingClient, CostFetcher, CostReport};

// Notifications
pub use crate::daemon::notifications::{Color, Notification, Notifier, WebhookNotifier};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::scheduler::Daemon;
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
