//! Log line classification and notification debouncing.
//!
//! Precedence per line: exclude, then error, then warning. Errors always
//! notify; warnings notify only in bulk and only when no error did.

#![allow(missing_docs)]

use std::sync::{Arc, LazyLock};

use regex::RegexSet;

use crate::core::config::LogConfig;
use crate::core::errors::{PervigilError, Result};
use crate::daemon::notifications::{Color, Notification, Notifier};
use crate::monitor::log_reader::LogReader;

/// Known-benign noise, never counted.
pub const DEFAULT_EXCLUDE_PATTERNS: [&str; 3] = [
    r"DHCP4_BUFFER_RECEIVE_FAIL.*Truncated",
    r"netlink-dp.*Network is down",
    r"pam_unix.*authentication failure",
];

pub const DEFAULT_ERROR_PATTERNS: [&str; 4] =
    [r"(?i)error", r"(?i)failed", r"(?i)critical", r"(?i)panic"];

pub const DEFAULT_WARNING_PATTERNS: [&str; 2] = [r"(?i)warning", r"(?i)\bwarn\b"];

static DEFAULT_PATTERNS: LazyLock<LogPatterns> = LazyLock::new(|| {
    LogPatterns::new(
        &DEFAULT_EXCLUDE_PATTERNS,
        &DEFAULT_ERROR_PATTERNS,
        &DEFAULT_WARNING_PATTERNS,
    )
    .expect("default log patterns are valid literals")
});

// ──────────────────── classification ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Ignored,
    Error,
    Warning,
}

/// The three ordered pattern sets.
#[derive(Debug, Clone)]
pub struct LogPatterns {
    exclude: RegexSet,
    error: RegexSet,
    warning: RegexSet,
}

impl Default for LogPatterns {
    fn default() -> Self {
        DEFAULT_PATTERNS.clone()
    }
}

impl LogPatterns {
    pub fn new<S: AsRef<str>>(exclude: &[S], error: &[S], warning: &[S]) -> Result<Self> {
        Ok(Self {
            exclude: compile("exclude", exclude)?,
            error: compile("error", error)?,
            warning: compile("warning", warning)?,
        })
    }

    #[must_use]
    pub fn classify(&self, line: &str) -> LineClass {
        if line.is_empty() || self.exclude.is_match(line) {
            LineClass::Ignored
        } else if self.error.is_match(line) {
            LineClass::Error
        } else if self.warning.is_match(line) {
            LineClass::Warning
        } else {
            LineClass::Ignored
        }
    }

    /// Compile the `[log]` pattern lists; a bad regex is an `InvalidConfig` error.
    pub fn from_config(config: &LogConfig) -> Result<Self> {
        Self::new(
            &config.exclude_patterns,
            &config.error_patterns,
            &config.warning_patterns,
        )
    }
}

fn compile<S: AsRef<str>>(kind: &str, patterns: &[S]) -> Result<RegexSet> {
    RegexSet::new(patterns).map_err(|err| PervigilError::InvalidConfig {
        details: format!("{kind} log pattern: {err}"),
    })
}

// ──────────────────── results ────────────────────

/// Counts and lines from one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub error_count: usize,
    pub warning_count: usize,
    pub error_lines: Vec<String>,
    pub warning_lines: Vec<String>,
}

/// A failed [`LogMonitor::process`]; `result` is present when only delivery failed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct LogCheckError {
    pub source: PervigilError,
    pub result: Option<ProcessResult>,
}

impl From<PervigilError> for LogCheckError {
    fn from(source: PervigilError) -> Self {
        Self {
            source,
            result: None,
        }
    }
}

impl From<LogCheckError> for PervigilError {
    fn from(err: LogCheckError) -> Self {
        err.source
    }
}

// ──────────────────── monitor ────────────────────

pub struct LogMonitor {
    reader: Box<dyn LogReader>,
    notifier: Arc<dyn Notifier>,
    patterns: LogPatterns,
    warning_threshold: usize,
    max_error_chars: usize,
    hostname: String,
}

impl std::fmt::Debug for LogMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMonitor")
            .field("warning_threshold", &self.warning_threshold)
            .field("max_error_chars", &self.max_error_chars)
            .finish_non_exhaustive()
    }
}

impl LogMonitor {
    pub fn new(reader: Box<dyn LogReader>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            reader,
            notifier,
            patterns: LogPatterns::default(),
            warning_threshold: 5,
            max_error_chars: 1000,
            hostname: "unknown-host".to_string(),
        }
    }

    #[must_use]
    pub fn with_patterns(mut self, patterns: LogPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    #[must_use]
    pub const fn with_warning_threshold(mut self, threshold: usize) -> Self {
        self.warning_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_max_error_chars(mut self, max: usize) -> Self {
        self.max_error_chars = max;
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Classify one batch of new lines and notify if warranted.
    pub fn process(&self) -> std::result::Result<ProcessResult, LogCheckError> {
        let lines = self.reader.read_new_lines()?;
        let result = self.classify_batch(&lines);

        if result.error_count > 0 || result.warning_count > 0 {
            tracing::debug!(
                lines = lines.len(),
                errors = result.error_count,
                warnings = result.warning_count,
                "log batch classified"
            );
        }

        match self.notify(&result) {
            Ok(()) => Ok(result),
            Err(source) => Err(LogCheckError {
                source,
                result: Some(result),
            }),
        }
    }

    #[must_use]
    pub fn classify_batch(&self, lines: &[String]) -> ProcessResult {
        let mut result = ProcessResult::default();
        for line in lines {
            match self.patterns.classify(line) {
                LineClass::Error => {
                    result.error_count += 1;
                    result.error_lines.push(line.clone());
                }
                LineClass::Warning => {
                    result.warning_count += 1;
                    result.warning_lines.push(line.clone());
                }
                LineClass::Ignored => {}
            }
        }
        result
    }

    fn notify(&self, result: &ProcessResult) -> Result<()> {
        if result.error_count > 0 {
            let excerpt = truncate_chars(&result.error_lines.join("\n"), self.max_error_chars);
            return self.notifier.send(
                &Notification::new(
                    format!("🚨 Log errors detected - {}", self.hostname),
                    format!("```\n{excerpt}\n```"),
                    Color::RED,
                )
                .with_field("Error Count", result.error_count.to_string()),
            );
        }

        if result.warning_count >= self.warning_threshold {
            return self.notifier.send(
                &Notification::new(
                    format!("⚠️ Log warnings - {}", self.hostname),
                    format!(
                        "{} warnings were logged since the last check.",
                        result.warning_count
                    ),
                    Color::YELLOW,
                )
                .with_field("Warning Count", result.warning_count.to_string()),
            );
        }

        Ok(())
    }
}

/// Cut to `max` characters, marking the cut with `...`.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
