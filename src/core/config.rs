//! Configuration system: TOML file + `.env` + env var overrides + smart defaults.
//!
//! The effective [`Config`] is built once at startup and handed to each
//! component by reference; nothing here is cached globally.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PervigilError, Result};
use crate::monitor::cost::CostThresholds;
use crate::monitor::logwatch::{
    DEFAULT_ERROR_PATTERNS, DEFAULT_EXCLUDE_PATTERNS, DEFAULT_WARNING_PATTERNS, LogPatterns,
};
use crate::monitor::thermal::NicThresholds;

/// Interface watched when nothing else is configured.
pub const DEFAULT_INTERFACE: &str = "eth1";

/// Full pervigil configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub thermal: ThermalConfig,
    pub speed: SpeedConfig,
    pub sensors: SensorConfig,
    pub log: LogConfig,
    pub cost: CostConfig,
    pub notifications: NotifyConfig,
    pub daemon: DaemonConfig,
    /// Where this config was loaded from (not serialized).
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// NIC thermal monitor thresholds and state location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermalConfig {
    /// Interfaces to watch; the hottest reading drives the state machine.
    pub interfaces: Vec<String>,
    pub warning: f64,
    pub critical: f64,
    pub recovery: f64,
    pub state_file: PathBuf,
    /// Fast timer period, shared with the log monitor.
    pub check_interval_secs: u64,
}

/// Link-speed throttle parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpeedConfig {
    pub limit_mbps: u32,
    /// ethtool advertise bitmask restored with auto-negotiation.
    pub advertise_mask: String,
    pub command_timeout_secs: u64,
}

/// Sensor backend invocation limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorConfig {
    pub command_timeout_secs: u64,
}

/// Log tail monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub position_file: PathBuf,
    pub max_lines: usize,
    pub warning_threshold: usize,
    pub max_error_chars: usize,
    /// Lines matching any of these are never counted.
    pub exclude_patterns: Vec<String>,
    pub error_patterns: Vec<String>,
    pub warning_patterns: Vec<String>,
}

/// Daily billing monitor settings. An empty `api_key` disables the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostConfig {
    pub api_key: String,
    pub base_url: String,
    pub daily_warning: f64,
    pub daily_critical: f64,
    pub state_file: PathBuf,
    pub check_interval_secs: u64,
    pub fetch_timeout_secs: u64,
}

/// Chat webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: String,
    pub username: String,
    pub timeout_secs: u64,
}

/// Scheduler-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Window during which an identical check failure is logged only once.
    pub error_suppress_interval_secs: u64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        let thresholds = NicThresholds::default();
        Self {
            interfaces: vec![DEFAULT_INTERFACE.to_string()],
            warning: thresholds.warning,
            critical: thresholds.critical,
            recovery: thresholds.recovery,
            state_file: PathBuf::from("/tmp/pervigil-state"),
            check_interval_secs: 60,
        }
    }
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            limit_mbps: 1000,
            // 100baseT/Full | 1000baseT/Full | 10000baseT/Full
            advertise_mask: "0x1028".to_string(),
            command_timeout_secs: 10,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("/var/log/syslog"),
            position_file: PathBuf::from("/tmp/pervigil-log-pos"),
            max_lines: 100,
            warning_threshold: 5,
            max_error_chars: 1000,
            exclude_patterns: owned(&DEFAULT_EXCLUDE_PATTERNS),
            error_patterns: owned(&DEFAULT_ERROR_PATTERNS),
            warning_patterns: owned(&DEFAULT_WARNING_PATTERNS),
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        let thresholds = CostThresholds::default();
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            daily_warning: thresholds.daily_warning,
            daily_critical: thresholds.daily_critical,
            state_file: PathBuf::from("/tmp/pervigil-cost-state"),
            check_interval_secs: 3600,
            fetch_timeout_secs: 30,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            username: "Pervigil".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            error_suppress_interval_secs: 3600,
        }
    }
}

impl ThermalConfig {
    #[must_use]
    pub const fn thresholds(&self) -> NicThresholds {
        NicThresholds {
            warning: self.warning,
            critical: self.critical,
            recovery: self.recovery,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl CostConfig {
    /// Whether the cost monitor should run at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    #[must_use]
    pub const fn thresholds(&self) -> CostThresholds {
        CostThresholds {
            daily_warning: self.daily_warning,
            daily_critical: self.daily_critical,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!("HOME not set, falling back to /etc for config path");
                PathBuf::from("/etc")
            },
            PathBuf::from,
        );
        home_dir.join(".config").join("pervigil").join("config.toml")
    }

    /// Load config from default or explicit path, then apply `.env` and env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PervigilError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(PervigilError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        // A missing .env is the normal case; a malformed one is worth a warning.
        match dotenvy::dotenv() {
            Ok(found) => tracing::debug!(path = %found.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(error = %err, ".env file not loaded"),
        }

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Copy of the config with secrets blanked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.cost.api_key.is_empty() {
            copy.cost.api_key = "<redacted>".to_string();
        }
        if !copy.notifications.webhook_url.is_empty() {
            copy.notifications.webhook_url = "<redacted>".to_string();
        }
        copy
    }

    fn apply_env_overrides_from<F>(&mut self, mut env: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // `PERVIGIL_*` wins; the unprefixed names of older `.env` files fill in.
        let mut lookup = |name: &str| -> Option<String> {
            if let Some(value) = env(name) {
                return Some(value);
            }
            let legacy = legacy_env_name(name)?;
            let value = env(legacy)?;
            tracing::debug!(name = legacy, "using legacy environment variable");
            Some(value)
        };

        // thermal
        if let Some(raw) = lookup("PERVIGIL_NIC_INTERFACES") {
            self.thermal.interfaces = split_interfaces(&raw);
        }
        set_f64(&mut lookup, "PERVIGIL_THERMAL_WARNING", &mut self.thermal.warning)?;
        set_f64(&mut lookup, "PERVIGIL_THERMAL_CRITICAL", &mut self.thermal.critical)?;
        set_f64(&mut lookup, "PERVIGIL_THERMAL_RECOVERY", &mut self.thermal.recovery)?;
        set_u64(
            &mut lookup,
            "PERVIGIL_CHECK_INTERVAL_SECS",
            &mut self.thermal.check_interval_secs,
        )?;
        set_path(&mut lookup, "PERVIGIL_STATE_FILE", &mut self.thermal.state_file);

        // log
        set_path(&mut lookup, "PERVIGIL_LOG_FILE", &mut self.log.path);
        set_path(&mut lookup, "PERVIGIL_LOG_POS_FILE", &mut self.log.position_file);

        // notifications
        if let Some(raw) = lookup("PERVIGIL_WEBHOOK_URL") {
            self.notifications.webhook_url = raw;
        }

        // cost
        if let Some(raw) = lookup("PERVIGIL_BILLING_API_KEY") {
            self.cost.api_key = raw;
        }
        set_u64(
            &mut lookup,
            "PERVIGIL_COST_CHECK_INTERVAL_SECS",
            &mut self.cost.check_interval_secs,
        )?;
        set_f64(&mut lookup, "PERVIGIL_DAILY_BUDGET_WARN", &mut self.cost.daily_warning)?;
        set_f64(&mut lookup, "PERVIGIL_DAILY_BUDGET_CRIT", &mut self.cost.daily_critical)?;
        set_path(&mut lookup, "PERVIGIL_COST_STATE_FILE", &mut self.cost.state_file);

        Ok(())
    }

    fn normalize(&mut self) {
        let joined = self.thermal.interfaces.join(",");
        self.thermal.interfaces = split_interfaces(&joined);
        self.cost.base_url = self.cost.base_url.trim_end_matches('/').to_string();
    }

    fn validate(&self) -> Result<()> {
        let t = &self.thermal;
        for (name, val) in [
            ("warning", t.warning),
            ("critical", t.critical),
            ("recovery", t.recovery),
        ] {
            if !val.is_finite() {
                return Err(invalid(format!("thermal.{name} must be finite, got {val}")));
            }
        }
        if !(t.recovery <= t.warning && t.warning < t.critical) {
            return Err(invalid(format!(
                "thermal thresholds must satisfy recovery <= warning < critical; got {} / {} / {}",
                t.recovery, t.warning, t.critical
            )));
        }
        if t.interfaces.is_empty() {
            return Err(invalid("thermal.interfaces must name at least one interface"));
        }

        let c = &self.cost;
        if !(c.daily_warning.is_finite() && c.daily_critical.is_finite())
            || c.daily_warning >= c.daily_critical
        {
            return Err(invalid(format!(
                "cost thresholds must satisfy daily_warning < daily_critical; got {} / {}",
                c.daily_warning, c.daily_critical
            )));
        }

        for (name, val) in [
            ("thermal.check_interval_secs", t.check_interval_secs),
            ("cost.check_interval_secs", c.check_interval_secs),
            ("cost.fetch_timeout_secs", c.fetch_timeout_secs),
            ("speed.command_timeout_secs", self.speed.command_timeout_secs),
            ("sensors.command_timeout_secs", self.sensors.command_timeout_secs),
            ("notifications.timeout_secs", self.notifications.timeout_secs),
        ] {
            if val == 0 {
                return Err(invalid(format!("{name} must be > 0")));
            }
        }

        if self.log.max_lines == 0 {
            return Err(invalid("log.max_lines must be >= 1"));
        }
        if self.log.warning_threshold == 0 {
            return Err(invalid("log.warning_threshold must be >= 1"));
        }
        if self.speed.limit_mbps == 0 {
            return Err(invalid("speed.limit_mbps must be > 0"));
        }
        if self.log.enabled {
            LogPatterns::from_config(&self.log)?;
        }

        Ok(())
    }

    /// Checks that only matter once the daemon is about to deliver alerts.
    pub fn require_webhook(&self) -> Result<&str> {
        let url = self.notifications.webhook_url.trim();
        if url.is_empty() {
            return Err(invalid(
                "notifications.webhook_url (or PERVIGIL_WEBHOOK_URL) is required",
            ));
        }
        Ok(url)
    }
}

/// Split a comma-separated interface list, trimming blanks.
///
/// An input with no usable names yields the default interface.
#[must_use]
pub fn split_interfaces(raw: &str) -> Vec<String> {
    let ifaces: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if ifaces.is_empty() {
        vec![DEFAULT_INTERFACE.to_string()]
    } else {
        ifaces
    }
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(ToString::to_string).collect()
}

fn invalid(details: impl Into<String>) -> PervigilError {
    PervigilError::InvalidConfig {
        details: details.into(),
    }
}

/// Unprefixed variable accepted when the `PERVIGIL_*` name is unset.
fn legacy_env_name(name: &str) -> Option<&'static str> {
    Some(match name {
        "PERVIGIL_WEBHOOK_URL" => "DISCORD_WEBHOOK_URL",
        "PERVIGIL_BILLING_API_KEY" => "ANTHROPIC_ADMIN_KEY",
        "PERVIGIL_NIC_INTERFACES" => "NIC_INTERFACE",
        "PERVIGIL_CHECK_INTERVAL_SECS" => "CHECK_INTERVAL",
        "PERVIGIL_STATE_FILE" => "STATE_FILE",
        "PERVIGIL_LOG_FILE" => "LOG_FILE",
        "PERVIGIL_LOG_POS_FILE" => "LOG_POS_FILE",
        "PERVIGIL_COST_CHECK_INTERVAL_SECS" => "COST_CHECK_INTERVAL",
        "PERVIGIL_DAILY_BUDGET_WARN" => "DAILY_BUDGET_WARN",
        "PERVIGIL_DAILY_BUDGET_CRIT" => "DAILY_BUDGET_CRIT",
        "PERVIGIL_COST_STATE_FILE" => "COST_STATE_FILE",
        _ => return None,
    })
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_error(name: &str, raw: &str, error: impl std::fmt::Display) -> PervigilError {
    PervigilError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    }
}

fn set_f64<F>(lookup: &mut F, name: &str, slot: &mut f64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<f64>()
            .map_err(|error| parse_error(name, &raw, error))?;
    }
    Ok(())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<u64>()
            .map_err(|error| parse_error(name, &raw, error))?;
    }
    Ok(())
}

fn set_path<F>(lookup: &mut F, name: &str, slot: &mut PathBuf)
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = PathBuf::from(raw);
    }
}
