//! Daemon scheduler: one timer thread per cadence, checks run serially.
//!
//! Architecture:
//! - fast thread: NIC thermal check, then log check, every `thermal.check_interval_secs`
//! - slow thread: cost check every `cost.check_interval_secs` (only with an API key)
//! - main thread: polls the signal flag, then closes the shutdown channel and joins
//!
//! Each thread runs its checks once at startup. Ticks that arrive while a check
//! is still running are dropped, so a slow check never queues a burst.
//! Failures are logged through a shared [`ErrorSuppressor`] and never stop the
//! daemon.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded, select, tick};
use parking_lot::Mutex;

use crate::billing::BillingClient;
use crate::core::config::Config;
use crate::core::errors::{PervigilError, Result};
use crate::daemon::notifications::{Notifier, WebhookNotifier};
use crate::daemon::signals::SignalHandler;
use crate::monitor::cost::CostMonitor;
use crate::monitor::log_reader::FileLogReader;
use crate::monitor::logwatch::{LogMonitor, LogPatterns};
use crate::monitor::speed::EthtoolSpeedController;
use crate::monitor::state::{FileCostStateStore, FileStateStore};
use crate::monitor::suppress::ErrorSuppressor;
use crate::monitor::thermal::NicMonitor;
use crate::platform::system::{OsSystem, hostname};
use crate::sensors::SensorReader;

/// How often the main thread looks at the shutdown flag.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const NIC_CHECK: &str = "nic";
pub const LOG_CHECK: &str = "log";
pub const COST_CHECK: &str = "cost";

/// Outcome of one check in [`Daemon::run_once`].
#[derive(Debug)]
pub struct CheckOutcome {
    pub monitor: &'static str,
    pub error: Option<PervigilError>,
}

impl CheckOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// False when the failure will not clear without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_none_or(PervigilError::is_retryable)
    }
}

// ──────────────────── checks ────────────────────

/// The monitors and the suppressor shared by the timer threads.
struct Checks {
    nic: NicMonitor,
    log: Option<LogMonitor>,
    cost: Option<CostMonitor>,
    suppressor: Mutex<ErrorSuppressor>,
}

impl Checks {
    fn run_nic(&self) -> Result<()> {
        self.guarded(NIC_CHECK, || self.nic.check().map(|_| ()))
    }

    fn run_log(&self) -> Option<Result<()>> {
        let log = self.log.as_ref()?;
        Some(self.guarded(LOG_CHECK, || {
            let result = log.process()?;
            if result.error_count > 0 || result.warning_count > 0 {
                tracing::info!(
                    errors = result.error_count,
                    warnings = result.warning_count,
                    "log check found problems"
                );
            }
            Ok(())
        }))
    }

    fn run_cost(&self) -> Option<Result<()>> {
        let cost = self.cost.as_ref()?;
        Some(self.guarded(COST_CHECK, || cost.check().map(|_| ())))
    }

    /// Run a check and log its failure unless the same failure was just logged.
    fn guarded(&self, name: &'static str, check: impl FnOnce() -> Result<()>) -> Result<()> {
        let outcome = check();
        let (message, should_log) = self
            .suppressor
            .lock()
            .check(name, outcome.as_ref().err());
        if should_log {
            match &outcome {
                Err(err) if !err.is_retryable() => {
                    tracing::error!(monitor = name, code = err.code(), "check failed: {message}");
                }
                _ => tracing::warn!(monitor = name, "check failed: {message}"),
            }
        }
        outcome
    }
}

// ──────────────────── daemon ────────────────────

pub struct Daemon {
    checks: Checks,
    fast_interval: Duration,
    slow_interval: Duration,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("fast_interval", &self.fast_interval)
            .field("slow_interval", &self.slow_interval)
            .field("log", &self.checks.log.is_some())
            .field("cost", &self.checks.cost.is_some())
            .finish()
    }
}

impl Daemon {
    /// Wire every monitor against the real host from an effective config.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.require_webhook()?;
        let host = hostname();
        let notifier: Arc<dyn Notifier> =
            Arc::new(WebhookNotifier::from_config(&config.notifications)?);
        let system = Arc::new(OsSystem);

        let nic = NicMonitor::new(
            Arc::new(SensorReader::new(
                system.clone(),
                Duration::from_secs(config.sensors.command_timeout_secs),
            )),
            Arc::clone(&notifier),
            Box::new(FileStateStore::new(&config.thermal.state_file)),
            Arc::new(EthtoolSpeedController::new(system, &config.speed)),
        )
        .with_thresholds(config.thermal.thresholds())
        .with_interfaces(config.thermal.interfaces.clone())
        .with_hostname(&host);

        let log = if config.log.enabled {
            Some(
                LogMonitor::new(
                    Box::new(
                        FileLogReader::new(&config.log.path, &config.log.position_file)
                            .with_max_lines(config.log.max_lines),
                    ),
                    Arc::clone(&notifier),
                )
                .with_patterns(LogPatterns::from_config(&config.log)?)
                .with_warning_threshold(config.log.warning_threshold)
                .with_max_error_chars(config.log.max_error_chars)
                .with_hostname(&host),
            )
        } else {
            None
        };

        let cost = if config.cost.is_enabled() {
            Some(
                CostMonitor::new(
                    Arc::new(BillingClient::from_config(&config.cost)?),
                    Arc::clone(&notifier),
                    Box::new(FileCostStateStore::new(&config.cost.state_file)),
                )
                .with_thresholds(config.cost.thresholds())
                .with_fetch_timeout(config.cost.fetch_timeout())
                .with_hostname(&host),
            )
        } else {
            tracing::info!("no billing API key configured, cost monitor disabled");
            None
        };

        Ok(Self::new(nic, config.thermal.interval())
            .with_log(log)
            .with_cost(cost, config.cost.interval())
            .with_suppress_interval(Duration::from_secs(
                config.daemon.error_suppress_interval_secs,
            )))
    }

    /// Daemon with only the thermal monitor on `fast_interval`.
    pub fn new(nic: NicMonitor, fast_interval: Duration) -> Self {
        Self {
            checks: Checks {
                nic,
                log: None,
                cost: None,
                suppressor: Mutex::new(ErrorSuppressor::default()),
            },
            fast_interval,
            slow_interval: Duration::from_secs(3600),
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: Option<LogMonitor>) -> Self {
        self.checks.log = log;
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: Option<CostMonitor>, slow_interval: Duration) -> Self {
        self.checks.cost = cost;
        self.slow_interval = slow_interval;
        self
    }

    #[must_use]
    pub fn with_suppress_interval(mut self, interval: Duration) -> Self {
        self.checks.suppressor = Mutex::new(ErrorSuppressor::new(interval));
        self
    }

    /// Run every enabled check once, in fast-then-slow order.
    pub fn run_once(&self) -> Vec<CheckOutcome> {
        let c = &self.checks;
        let mut outcomes = vec![outcome(NIC_CHECK, c.run_nic())];
        if let Some(result) = c.run_log() {
            outcomes.push(outcome(LOG_CHECK, result));
        }
        if let Some(result) = c.run_cost() {
            outcomes.push(outcome(COST_CHECK, result));
        }
        outcomes
    }

    /// Run until `signals` requests shutdown.
    pub fn run(self, signals: &SignalHandler) -> Result<()> {
        tracing::info!(
            fast_secs = self.fast_interval.as_secs(),
            slow_secs = self.slow_interval.as_secs(),
            log = self.checks.log.is_some(),
            cost = self.checks.cost.is_some(),
            interfaces = ?self.checks.nic.interfaces(),
            "pervigil daemon started"
        );

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let mut handles = Vec::new();
        let checks = Arc::new(self.checks);

        let fast = Arc::clone(&checks);
        handles.push(spawn_timer(
            "pervigil-fast",
            self.fast_interval,
            shutdown_rx.clone(),
            move || {
                let _ = fast.run_nic();
                let _ = fast.run_log();
            },
        )?);

        if checks.cost.is_some() {
            let slow = Arc::clone(&checks);
            handles.push(spawn_timer(
                "pervigil-slow",
                self.slow_interval,
                shutdown_rx,
                move || {
                    let _ = slow.run_cost();
                },
            )?);
        }

        while !signals.should_shutdown() {
            thread::sleep(SIGNAL_POLL_INTERVAL);
        }

        tracing::info!("shutdown requested, waiting for running checks");
        drop(shutdown_tx);
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
        tracing::info!("pervigil daemon stopped");
        Ok(())
    }
}

fn outcome(monitor: &'static str, result: Result<()>) -> CheckOutcome {
    CheckOutcome {
        monitor,
        error: result.err(),
    }
}

fn spawn_timer(
    name: &str,
    interval: Duration,
    shutdown_rx: Receiver<()>,
    mut checks: impl FnMut() + Send + 'static,
) -> Result<thread::JoinHandle<()>> {
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let ticker = tick(interval);
            checks();
            loop {
                select! {
                    recv(ticker) -> _ => {
                        checks();
                        let skipped = ticker.try_iter().count();
                        if skipped > 0 {
                            tracing::debug!(timer = %thread_name, skipped, "ticks dropped while a check was running");
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
        })
        .map_err(|source| PervigilError::Runtime {
            details: format!("failed to spawn {name} thread: {source}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::fakes::{MemoryStore, RecordingNotifier, RecordingSpeed, ScriptedTemps};
    use crate::monitor::thermal::{MonitorState, StateStore};
    use std::time::Instant;

    fn nic(temps: ScriptedTemps, notifier: Arc<RecordingNotifier>) -> NicMonitor {
        NicMonitor::new(
            Arc::new(temps),
            notifier,
            Box::new(MemoryStore::default()),
            Arc::new(RecordingSpeed::default()),
        )
    }

    #[test]
    fn run_once_reports_each_enabled_check() {
        let notifier = Arc::new(RecordingNotifier::default());
        let daemon = Daemon::new(
            nic(ScriptedTemps::single("eth1", &[90.0]), notifier.clone()),
            Duration::from_secs(60),
        );
        let outcomes = daemon.run_once();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].monitor, NIC_CHECK);
        assert!(outcomes[0].is_ok());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn failed_check_is_reported_not_fatal() {
        let notifier = Arc::new(RecordingNotifier::default());
        let daemon = Daemon::new(nic(ScriptedTemps::default(), notifier), Duration::from_secs(60));
        let first = daemon.run_once();
        let second = daemon.run_once();
        assert!(!first[0].is_ok());
        assert!(matches!(
            second[0].error,
            Some(PervigilError::SensorUnavailable { .. })
        ));
        assert_eq!(daemon.checks.suppressor.lock().tracked(), 1);
        assert!(second[0].is_retryable(), "a missing sensor may come back");
    }

    #[test]
    fn config_failures_are_not_retryable() {
        let failed = outcome(
            COST_CHECK,
            Err(PervigilError::InvalidConfig {
                details: "cost.api_key rejected".to_string(),
            }),
        );
        assert!(!failed.is_ok());
        assert!(!failed.is_retryable());
        assert!(outcome(NIC_CHECK, Ok(())).is_retryable());
    }

    #[test]
    fn run_checks_at_startup_and_stops_on_signal() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(MemoryStore::default());

        struct Shared(Arc<MemoryStore>);
        impl StateStore for Shared {
            fn load(&self) -> Result<MonitorState> {
                self.0.load()
            }
            fn save(&self, state: &MonitorState) -> Result<()> {
                self.0.save(state)
            }
        }

        let monitor = NicMonitor::new(
            Arc::new(ScriptedTemps::single("eth1", &[75.0; 64])),
            notifier.clone(),
            Box::new(Shared(store.clone())),
            Arc::new(RecordingSpeed::default()),
        );
        let daemon = Daemon::new(monitor, Duration::from_millis(20));
        let signals = SignalHandler::unregistered();

        let runner = {
            let signals = signals.clone();
            thread::spawn(move || daemon.run(&signals))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while *store.saves.lock() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        signals.request_shutdown();
        runner.join().unwrap().unwrap();

        assert!(*store.saves.lock() >= 3, "startup check plus ticks");
        assert_eq!(notifier.count(), 1, "steady warning notifies once");
    }
}
