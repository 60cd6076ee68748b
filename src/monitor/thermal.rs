//! NIC thermal monitor: a hysteresis state machine over the hottest NIC
//! reading that throttles link speed while the card is critical.
//!
//! Ordering per check: read sensors, load state, decide, notify, act, save.
//! Any failure after the decision aborts before `save`, so the same
//! transition is attempted again on the next tick.

#![allow(missing_docs)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::DEFAULT_INTERFACE;
use crate::core::errors::{PervigilError, Result};
use crate::daemon::notifications::{Color, Notification, Notifier};
use crate::monitor::speed::SpeedController;
use crate::monitor::state::Level;
use crate::sensors::{NicTempSource, TempReading};

/// Thermal alert level as persisted in `temp_state`.
pub type NicState = Level;

// ──────────────────── thresholds ────────────────────

/// Rising (`warning`, `critical`) and falling (`recovery`) edges in °C.
///
/// Expected to satisfy `recovery <= warning < critical`; config validation
/// enforces it before a monitor is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NicThresholds {
    pub warning: f64,
    pub critical: f64,
    pub recovery: f64,
}

impl Default for NicThresholds {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            recovery: 65.0,
        }
    }
}

impl NicThresholds {
    /// Level for a raw reading, ignoring history.
    #[must_use]
    pub fn classify(&self, temp: f64) -> NicState {
        if temp >= self.critical {
            Level::Critical
        } else if temp >= self.warning {
            Level::Warning
        } else {
            Level::Normal
        }
    }
}

// ──────────────────── persisted state ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    pub temp_state: NicState,
    pub speed_limited: bool,
}

/// Persistence for the thermal monitor's single record.
pub trait StateStore: Send + Sync {
    /// Missing or malformed records load as the default state.
    fn load(&self) -> Result<MonitorState>;
    fn save(&self, state: &MonitorState) -> Result<()>;
}

// ──────────────────── monitor ────────────────────

pub struct NicMonitor {
    sensors: Arc<dyn NicTempSource>,
    notifier: Arc<dyn Notifier>,
    store: Box<dyn StateStore>,
    speed: Arc<dyn SpeedController>,
    thresholds: NicThresholds,
    ifaces: Vec<String>,
    hostname: String,
}

impl std::fmt::Debug for NicMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NicMonitor")
            .field("thresholds", &self.thresholds)
            .field("ifaces", &self.ifaces)
            .finish_non_exhaustive()
    }
}

impl NicMonitor {
    /// Monitor with default thresholds watching the default interface.
    pub fn new(
        sensors: Arc<dyn NicTempSource>,
        notifier: Arc<dyn Notifier>,
        store: Box<dyn StateStore>,
        speed: Arc<dyn SpeedController>,
    ) -> Self {
        Self {
            sensors,
            notifier,
            store,
            speed,
            thresholds: NicThresholds::default(),
            ifaces: vec![DEFAULT_INTERFACE.to_string()],
            hostname: "unknown-host".to_string(),
        }
    }

    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: NicThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replace the watched interfaces; an empty list keeps the default.
    #[must_use]
    pub fn with_interfaces(mut self, ifaces: Vec<String>) -> Self {
        if !ifaces.is_empty() {
            self.ifaces = ifaces;
        }
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn interfaces(&self) -> &[String] {
        &self.ifaces
    }

    /// Run one check and return the state that was persisted.
    pub fn check(&self) -> Result<MonitorState> {
        let hottest = self.hottest()?;
        let current = self.store.load()?;
        let next = self.transition(current, &hottest)?;
        self.store.save(&next)?;

        if next != current {
            tracing::info!(
                iface = %hottest.label,
                temp = hottest.value,
                from = %current.temp_state,
                to = %next.temp_state,
                speed_limited = next.speed_limited,
                "nic thermal state changed"
            );
        } else {
            tracing::debug!(iface = %hottest.label, temp = hottest.value, state = %next.temp_state, "nic temperature checked");
        }
        Ok(next)
    }

    /// Hottest reading across the configured interfaces; ties keep the first.
    fn hottest(&self) -> Result<TempReading> {
        let mut best: Option<TempReading> = None;
        let mut last_err = None;

        for iface in &self.ifaces {
            match self.sensors.nic_temp(iface) {
                Ok(reading) => {
                    if best.as_ref().is_none_or(|b| reading.value > b.value) {
                        best = Some(TempReading::new(iface.as_str(), reading.value));
                    }
                }
                Err(err) => {
                    tracing::debug!(iface = %iface, error = %err, "nic temperature unavailable");
                    last_err = Some(err);
                }
            }
        }

        best.ok_or_else(|| PervigilError::SensorUnavailable {
            details: last_err.map_or_else(
                || "no NIC temperature available".to_string(),
                |err| format!("no NIC temperature available: {err}"),
            ),
        })
    }

    fn transition(&self, current: MonitorState, reading: &TempReading) -> Result<MonitorState> {
        let temp = reading.value;
        let iface = reading.label.as_str();
        let level = self.thresholds.classify(temp);
        let mut next = MonitorState {
            temp_state: level,
            speed_limited: current.speed_limited,
        };

        if level == Level::Critical && current.temp_state != Level::Critical {
            self.notifier.send(
                &self
                    .notification(
                        format!("🔥 NIC overheating - {}", self.hostname),
                        format!("NIC {iface} reached the critical temperature. Limiting link speed."),
                        Color::RED,
                        temp,
                        iface,
                    )
                    .with_field("Threshold", degrees(self.thresholds.critical))
                    .with_field("Action", "Link speed limited"),
            )?;
            self.speed.limit(iface)?;
            next.speed_limited = true;
        } else if level == Level::Warning && current.temp_state == Level::Normal {
            self.notifier.send(
                &self
                    .notification(
                        format!("⚠️ NIC temperature warning - {}", self.hostname),
                        format!("NIC {iface} reached the warning temperature. Monitoring continues."),
                        Color::YELLOW,
                        temp,
                        iface,
                    )
                    .with_field("Warning Threshold", degrees(self.thresholds.warning))
                    .with_field("Critical Threshold", degrees(self.thresholds.critical)),
            )?;
        } else if current.speed_limited && temp <= self.thresholds.recovery {
            self.notifier.send(
                &self
                    .notification(
                        format!("✅ NIC temperature recovered - {}", self.hostname),
                        format!("NIC {iface} is back in the normal range. Removing the link speed limit."),
                        Color::GREEN,
                        temp,
                        iface,
                    )
                    .with_field("Action", "Link speed restored to auto-negotiation"),
            )?;
            self.speed.restore(iface)?;
            next.speed_limited = false;
        } else if level == Level::Normal
            && current.temp_state == Level::Warning
            && !current.speed_limited
        {
            self.notifier.send(&self.notification(
                format!("✅ NIC temperature recovered - {}", self.hostname),
                format!("NIC {iface} is back in the normal range."),
                Color::GREEN,
                temp,
                iface,
            ))?;
        }

        Ok(next)
    }

    fn notification(
        &self,
        title: String,
        message: String,
        color: Color,
        temp: f64,
        iface: &str,
    ) -> Notification {
        Notification::new(title, message, color)
            .with_field("Temperature", format!("{temp:.1}°C"))
            .with_field("Interface", iface)
    }
}

fn degrees(threshold: f64) -> String {
    format!("{threshold:.0}°C")
}

// ──────────────────── tests ────────────────────
