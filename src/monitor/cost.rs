//! Daily billing monitor: a warning/critical state machine over today's
//! total cost that starts fresh at every UTC day boundary.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::CostFetcher;
use crate::core::errors::Result;
use crate::daemon::notifications::{Color, Notification, Notifier};
use crate::monitor::state::Level;

pub type CostState = Level;

/// Daily spend thresholds in USD; `daily_warning < daily_critical`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostThresholds {
    pub daily_warning: f64,
    pub daily_critical: f64,
}

impl Default for CostThresholds {
    fn default() -> Self {
        Self {
            daily_warning: 5.0,
            daily_critical: 10.0,
        }
    }
}

impl CostThresholds {
    #[must_use]
    pub fn classify(&self, cost: f64) -> CostState {
        if cost >= self.daily_critical {
            Level::Critical
        } else if cost >= self.daily_warning {
            Level::Warning
        } else {
            Level::Normal
        }
    }
}

/// Persisted cost record. `date` is `YYYY-MM-DD` (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostStateData {
    pub state: CostState,
    pub date: String,
}

pub trait CostStateStore: Send + Sync {
    fn load(&self) -> Result<CostStateData>;
    fn save(&self, state: &CostStateData) -> Result<()>;
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct CostMonitor {
    fetcher: Arc<dyn CostFetcher>,
    notifier: Arc<dyn Notifier>,
    store: Box<dyn CostStateStore>,
    thresholds: CostThresholds,
    fetch_timeout: Duration,
    hostname: String,
    now: Clock,
}

impl std::fmt::Debug for CostMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostMonitor")
            .field("thresholds", &self.thresholds)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl CostMonitor {
    pub fn new(
        fetcher: Arc<dyn CostFetcher>,
        notifier: Arc<dyn Notifier>,
        store: Box<dyn CostStateStore>,
    ) -> Self {
        Self {
            fetcher,
            notifier,
            store,
            thresholds: CostThresholds::default(),
            fetch_timeout: Duration::from_secs(30),
            hostname: "unknown-host".to_string(),
            now: Box::new(Utc::now),
        }
    }

    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: CostThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Replace the wall clock, for tests and replay.
    #[must_use]
    pub fn with_clock(mut self, now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.now = Box::new(now);
        self
    }

    /// Run one check and return the record that was persisted.
    pub fn check(&self) -> Result<CostStateData> {
        let today = (self.now)().date_naive();
        let tomorrow = today.succ_opt().unwrap_or(NaiveDate::MAX);
        let today_str = today.format("%Y-%m-%d").to_string();

        let report = self.fetcher.get_cost(today, tomorrow, self.fetch_timeout)?;
        let cost = report.total_usd();

        let mut prev = self.store.load()?;
        if prev.date != today_str {
            if !prev.date.is_empty() {
                tracing::info!(previous = %prev.date, today = %today_str, "cost state rolled over to a new day");
            }
            prev = CostStateData {
                state: Level::Normal,
                date: today_str.clone(),
            };
        }

        let next = self.thresholds.classify(cost);
        if next != prev.state {
            self.send_transition(prev.state, next, cost)?;
            tracing::info!(cost_usd = cost, from = %prev.state, to = %next, "cost state changed");
        } else {
            tracing::debug!(cost_usd = cost, state = %next, "daily cost checked");
        }

        let record = CostStateData {
            state: next,
            date: today_str,
        };
        self.store.save(&record)?;
        Ok(record)
    }

    fn send_transition(&self, from: CostState, to: CostState, cost: f64) -> Result<()> {
        let (title, message, color) = match to {
            Level::Critical => (
                "🔴 API cost critical",
                "Daily cost exceeded the critical threshold.",
                Color::RED,
            ),
            Level::Warning => (
                "🟡 API cost warning",
                "Daily cost exceeded the warning threshold.",
                Color::YELLOW,
            ),
            Level::Normal if from != Level::Normal => (
                "🟢 API cost back to normal",
                "Daily cost is back in the normal range.",
                Color::GREEN,
            ),
            Level::Normal => return Ok(()),
        };

        self.notifier.send(
            &Notification::new(format!("{title} - {}", self.hostname), message, color)
                .with_field("Daily Cost", usd(cost))
                .with_field("Warning", usd(self.thresholds.daily_warning))
                .with_field("Critical", usd(self.thresholds.daily_critical)),
        )
    }
}

fn usd(amount: f64) -> String {
    format!("${amount:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{CostBucket, CostReport};
    use crate::core::errors::PervigilError;
    use crate::monitor::fakes::{MemoryCostStore, RecordingNotifier};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedCosts {
        costs: Mutex<VecDeque<Option<Vec<f64>>>>,
        ranges: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    impl CostFetcher for ScriptedCosts {
        fn get_cost(&self, start: NaiveDate, end: NaiveDate, _timeout: Duration) -> Result<CostReport> {
            self.ranges.lock().push((start, end));
            match self.costs.lock().pop_front().flatten() {
                Some(buckets) => Ok(CostReport {
                    data: buckets
                        .into_iter()
                        .map(|cost_usd| CostBucket {
                            date: start.to_string(),
                            cost_usd,
                        })
                        .collect(),
                }),
                None => Err(PervigilError::FetchFailed {
                    source_name: "billing api",
                    details: "send request: connection refused".to_string(),
                }),
            }
        }
    }

    struct SharedCostStore(Arc<MemoryCostStore>);

    impl CostStateStore for SharedCostStore {
        fn load(&self) -> Result<CostStateData> {
            self.0.load()
        }
        fn save(&self, state: &CostStateData) -> Result<()> {
            self.0.save(state)
        }
    }

    struct Rig {
        fetcher: Arc<ScriptedCosts>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemoryCostStore>,
        monitor: CostMonitor,
    }

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn rig(costs: Vec<Option<Vec<f64>>>) -> Rig {
        let fetcher = Arc::new(ScriptedCosts {
            costs: Mutex::new(costs.into()),
            ..ScriptedCosts::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(MemoryCostStore::default());
        let now = at("2026-10-17T23:30:00Z");
        let monitor = CostMonitor::new(
            fetcher.clone(),
            notifier.clone(),
            Box::new(SharedCostStore(store.clone())),
        )
        .with_hostname("host")
        .with_clock(move || now);
        Rig {
            fetcher,
            notifier,
            store,
            monitor,
        }
    }

    #[test]
    fn same_day_sequence_notifies_on_each_boundary() {
        let r = rig(vec![
            Some(vec![2.0]),
            Some(vec![6.0]),
            Some(vec![12.0]),
            Some(vec![3.0]),
        ]);
        let states: Vec<Level> = (0..4).map(|_| r.monitor.check().unwrap().state).collect();
        assert_eq!(
            states,
            vec![Level::Normal, Level::Warning, Level::Critical, Level::Normal]
        );

        let colors: Vec<Color> = r.notifier.sent.lock().iter().map(|n| n.color).collect();
        assert_eq!(colors, vec![Color::YELLOW, Color::RED, Color::GREEN]);
    }

    #[test]
    fn fetches_one_utc_day_and_sums_buckets() {
        let r = rig(vec![Some(vec![1.5, 2.0, 2.0])]);
        let record = r.monitor.check().unwrap();
        assert_eq!(record.state, Level::Warning);
        assert_eq!(record.date, "2026-10-17");
        let ranges = r.fetcher.ranges.lock();
        assert_eq!(ranges[0].0.to_string(), "2026-10-17");
        assert_eq!(ranges[0].1.to_string(), "2026-10-18");

        let sent = r.notifier.sent.lock();
        assert_eq!(sent[0].title, "🟡 API cost warning - host");
        assert_eq!(sent[0].fields[0].value, "$5.50");
        assert_eq!(sent[0].fields[1].value, "$5.00");
        assert_eq!(sent[0].fields[2].value, "$10.00");
    }

    #[test]
    fn stale_critical_day_starts_from_normal() {
        let r = rig(vec![Some(vec![1.0])]);
        *r.store.state.lock() = Some(CostStateData {
            state: Level::Critical,
            date: "2026-10-16".to_string(),
        });
        let record = r.monitor.check().unwrap();
        assert_eq!(record.state, Level::Normal);
        assert_eq!(record.date, "2026-10-17");
        assert_eq!(r.notifier.count(), 0, "rollover must not look like a recovery");
    }

    #[test]
    fn rollover_evaluates_today_from_normal() {
        let r = rig(vec![Some(vec![15.0])]);
        *r.store.state.lock() = Some(CostStateData {
            state: Level::Critical,
            date: "2026-10-16".to_string(),
        });
        assert_eq!(r.monitor.check().unwrap().state, Level::Critical);
        assert_eq!(r.notifier.count(), 1);
    }

    #[test]
    fn critical_to_warning_alerts_warning() {
        let r = rig(vec![Some(vec![7.0])]);
        *r.store.state.lock() = Some(CostStateData {
            state: Level::Critical,
            date: "2026-10-17".to_string(),
        });
        r.monitor.check().unwrap();
        assert_eq!(r.notifier.sent.lock()[0].color, Color::YELLOW);
    }

    #[test]
    fn fetch_failure_changes_nothing() {
        let r = rig(vec![None]);
        let seeded = CostStateData {
            state: Level::Warning,
            date: "2026-10-17".to_string(),
        };
        *r.store.state.lock() = Some(seeded.clone());
        let err = r.monitor.check().unwrap_err();
        assert!(matches!(err, PervigilError::FetchFailed { .. }));
        assert_eq!(*r.store.state.lock(), Some(seeded));
        assert_eq!(r.notifier.count(), 0);
    }

    #[test]
    fn notification_failure_skips_save() {
        let r = rig(vec![Some(vec![12.0]), Some(vec![12.0])]);
        r.notifier.set_failing(true);
        assert!(r.monitor.check().is_err());
        assert!(r.store.state.lock().is_none());

        r.notifier.set_failing(false);
        assert_eq!(r.monitor.check().unwrap().state, Level::Critical);
        assert_eq!(r.notifier.count(), 1);
    }

    #[test]
    fn unchanged_state_is_saved_without_notification() {
        let r = rig(vec![Some(vec![1.0]), Some(vec![2.0])]);
        r.monitor.check().unwrap();
        r.monitor.check().unwrap();
        assert_eq!(r.notifier.count(), 0);
        assert_eq!(
            *r.store.state.lock(),
            Some(CostStateData {
                state: Level::Normal,
                date: "2026-10-17".to_string()
            })
        );
    }
}
