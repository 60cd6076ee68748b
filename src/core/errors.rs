//! PVG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PervigilError>;

/// Top-level error type for pervigil.
///
/// The monitoring variants (`PVG-2xxx`) are what a failed check returns to the
/// scheduler. None of them is fatal to the daemon; the check is retried on the
/// next tick because state is only persisted after a fully successful check.
#[derive(Debug, Error)]
pub enum PervigilError {
    #[error("[PVG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PVG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PVG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PVG-2001] sensor unavailable: {details}")]
    SensorUnavailable { details: String },

    #[error("[PVG-2002] fetch failed from {source_name}: {details}")]
    FetchFailed {
        source_name: &'static str,
        details: String,
    },

    #[error("[PVG-2003] action failed ({action} on {target}): {details}")]
    ActionFailed {
        action: &'static str,
        target: String,
        details: String,
    },

    #[error("[PVG-2004] failed to persist state to {path}: {details}")]
    PersistenceFailed { path: PathBuf, details: String },

    #[error("[PVG-2005] notification delivery failed: {details}")]
    NotificationFailed { details: String },

    #[error("[PVG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PVG-3001] command `{command}` failed: {details}")]
    CommandFailed { command: String, details: String },

    #[error("[PVG-3002] command `{command}` timed out after {timeout_ms} ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("[PVG-3003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PVG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl PervigilError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PVG-1001",
            Self::MissingConfig { .. } => "PVG-1002",
            Self::ConfigParse { .. } => "PVG-1003",
            Self::SensorUnavailable { .. } => "PVG-2001",
            Self::FetchFailed { .. } => "PVG-2002",
            Self::ActionFailed { .. } => "PVG-2003",
            Self::PersistenceFailed { .. } => "PVG-2004",
            Self::NotificationFailed { .. } => "PVG-2005",
            Self::Serialization { .. } => "PVG-2101",
            Self::CommandFailed { .. } => "PVG-3001",
            Self::CommandTimeout { .. } => "PVG-3002",
            Self::Io { .. } => "PVG-3003",
            Self::Runtime { .. } => "PVG-3900",
        }
    }

    /// Whether retrying on the next scheduler tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for state write failures.
    #[must_use]
    pub fn persistence(path: impl AsRef<Path>, details: impl ToString) -> Self {
        Self::PersistenceFailed {
            path: path.as_ref().to_path_buf(),
            details: details.to_string(),
        }
    }
}

impl From<serde_json::Error> for PervigilError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PervigilError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for PervigilError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
