//! Keyed deduplication of repeated error messages over a time window.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

/// Default window during which an unchanged error is logged only once.
pub const DEFAULT_SUPPRESS_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct SuppressEntry {
    last_message: String,
    last_logged_at: Instant,
    suppressed_count: u64,
}

/// Decides whether a recurring error should be logged now.
///
/// Entries live in memory only and are dropped as soon as their key reports
/// success, so a recovered check logs its next failure immediately.
#[derive(Debug)]
pub struct ErrorSuppressor {
    interval: Duration,
    entries: HashMap<String, SuppressEntry>,
}

impl Default for ErrorSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESS_INTERVAL)
    }
}

impl ErrorSuppressor {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: HashMap::new(),
        }
    }

    /// Record the outcome of one check for `key`.
    ///
    /// Returns the message to log and whether to log it at all.
    pub fn check<E: Display + ?Sized>(&mut self, key: &str, error: Option<&E>) -> (String, bool) {
        self.check_at(key, error, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at<E: Display + ?Sized>(
        &mut self,
        key: &str,
        error: Option<&E>,
        now: Instant,
    ) -> (String, bool) {
        let Some(error) = error else {
            self.entries.remove(key);
            return (String::new(), false);
        };
        let message = error.to_string();

        match self.entries.get_mut(key) {
            Some(entry) if entry.last_message == message => {
                if now.saturating_duration_since(entry.last_logged_at) < self.interval {
                    entry.suppressed_count += 1;
                    return (String::new(), false);
                }
                let out = if entry.suppressed_count > 0 {
                    format!("{message} (suppressed {} times)", entry.suppressed_count)
                } else {
                    message
                };
                entry.last_logged_at = now;
                entry.suppressed_count = 0;
                (out, true)
            }
            _ => {
                self.entries.insert(
                    key.to_string(),
                    SuppressEntry {
                        last_message: message.clone(),
                        last_logged_at: now,
                        suppressed_count: 0,
                    },
                );
                (message, true)
            }
        }
    }

    /// Number of keys currently failing.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn first_error_logs_then_suppresses_then_reports_count() {
        let mut s = ErrorSuppressor::new(HOUR);
        let t0 = Instant::now();

        assert_eq!(s.check_at("k", Some("boom"), t0), ("boom".to_string(), true));
        assert_eq!(
            s.check_at("k", Some("boom"), t0 + Duration::from_secs(1)),
            (String::new(), false)
        );
        assert_eq!(
            s.check_at("k", Some("boom"), t0 + HOUR),
            ("boom (suppressed 1 times)".to_string(), true)
        );
    }

    #[test]
    fn interval_elapsed_without_repeats_logs_raw_message() {
        let mut s = ErrorSuppressor::new(HOUR);
        let t0 = Instant::now();
        s.check_at("k", Some("boom"), t0);
        assert_eq!(s.check_at("k", Some("boom"), t0 + HOUR * 2), ("boom".to_string(), true));
    }

    #[test]
    fn changed_message_logs_immediately() {
        let mut s = ErrorSuppressor::new(HOUR);
        let t0 = Instant::now();
        s.check_at("k", Some("a"), t0);
        s.check_at("k", Some("a"), t0);
        assert_eq!(s.check_at("k", Some("b"), t0), ("b".to_string(), true));
        // The new message restarts the window with a zero count.
        assert_eq!(s.check_at("k", Some("b"), t0 + HOUR), ("b".to_string(), true));
    }

    #[test]
    fn success_clears_the_key() {
        let mut s = ErrorSuppressor::new(HOUR);
        let t0 = Instant::now();
        s.check_at("k", Some("boom"), t0);
        assert_eq!(s.check_at::<str>("k", None, t0), (String::new(), false));
        assert_eq!(s.tracked(), 0);
        assert_eq!(s.check_at("k", Some("boom"), t0), ("boom".to_string(), true));
    }

    #[test]
    fn keys_are_independent() {
        let mut s = ErrorSuppressor::new(HOUR);
        let t0 = Instant::now();
        s.check_at("nic", Some("boom"), t0);
        assert_eq!(s.check_at("log", Some("boom"), t0), ("boom".to_string(), true));
        s.check_at::<str>("log", None, t0);
        assert_eq!(s.check_at("nic", Some("boom"), t0), (String::new(), false));
    }

    proptest! {
        /// Within one window an unchanged error logs exactly once, and the
        /// first log after the window reports every suppressed repeat.
        #[test]
        fn repeats_within_window_are_counted(repeats in 0u64..50, offsets in proptest::collection::vec(0u64..3599, 50)) {
            let mut s = ErrorSuppressor::new(HOUR);
            let t0 = Instant::now();
            prop_assert!(s.check_at("k", Some("e"), t0).1);
            for off in offsets.iter().take(usize::try_from(repeats).unwrap()) {
                prop_assert_eq!(s.check_at("k", Some("e"), t0 + Duration::from_secs(*off)), (String::new(), false));
            }
            let (msg, logged) = s.check_at("k", Some("e"), t0 + HOUR);
            prop_assert!(logged);
            if repeats == 0 {
                prop_assert_eq!(msg, "e");
            } else {
                prop_assert_eq!(msg, format!("e (suppressed {repeats} times)"));
            }
        }
    }
}
