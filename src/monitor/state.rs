//! Durable per-monitor state: one small JSON record per file.
//!
//! Loads never fail on content: a missing, malformed, or out-of-vocabulary
//! record recovers to the default. Writes go through a temp file and a rename
//! so a crash mid-write leaves the previous record intact.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::errors::{PervigilError, Result};
use crate::monitor::cost::{CostStateData, CostStateStore};
use crate::monitor::thermal::{MonitorState, StateStore};

// ──────────────────── level ────────────────────

/// Discrete alert level shared by the thermal and cost state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Level {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown values coerce to normal.
impl From<String> for Level {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "warning" => Self::Warning,
            "critical" => Self::Critical,
            _ => Self::Normal,
        }
    }
}

// ──────────────────── JSON file helpers ────────────────────

/// Read a JSON record, falling back to `T::default()` when absent or garbled.
fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => return Err(PervigilError::io(path, source)),
    };
    Ok(serde_json::from_slice(&raw).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "discarding malformed state record");
        T::default()
    }))
}

/// Atomically replace `path` with the JSON encoding of `state` (mode 0600).
pub fn write_json_atomic<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    let json = serde_json::to_vec(state)?;
    write_atomic(path, &json).map_err(|err| PervigilError::persistence(path, err))
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

// ──────────────────── stores ────────────────────

/// Thermal [`MonitorState`] persisted as `{"temp_state": .., "speed_limited": ..}`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<MonitorState> {
        load_json_or_default(&self.path)
    }

    fn save(&self, state: &MonitorState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}

/// Cost [`CostStateData`] persisted as `{"state": .., "date": "YYYY-MM-DD"}`.
#[derive(Debug, Clone)]
pub struct FileCostStateStore {
    path: PathBuf,
}

impl FileCostStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CostStateStore for FileCostStateStore {
    fn load(&self) -> Result<CostStateData> {
        load_json_or_default(&self.path)
    }

    fn save(&self, state: &CostStateData) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}
