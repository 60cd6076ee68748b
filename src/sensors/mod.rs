//! Temperature sensors: CPU cores and NIC modules behind ordered fallback chains.
//!
//! Every tier is stateless; the first tier that yields a reading wins. Output
//! grammars are parsed by pure functions in [`cpu`] and [`nic`].

pub mod cpu;
pub mod nic;

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::DEFAULT_INTERFACE;
use crate::core::errors::Result;
use crate::platform::system::{OsSystem, SystemAccess};

/// A single labelled temperature in degrees Celsius.
#[derive(Debug, Clone, PartialEq)]
pub struct TempReading {
    /// Core label, chip name, or interface name.
    pub label: String,
    /// Degrees Celsius.
    pub value: f64,
}

impl TempReading {
    /// Build a reading.
    #[must_use]
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Source of NIC temperatures, as consumed by the thermal monitor.
pub trait NicTempSource: Send + Sync {
    /// Hottest available reading for `iface`.
    fn nic_temp(&self, iface: &str) -> Result<TempReading>;
}

/// Sensor reader over an injectable [`SystemAccess`].
///
/// Shared by reference between monitors; it carries no mutable state.
#[derive(Clone)]
pub struct SensorReader {
    system: Arc<dyn SystemAccess>,
    command_timeout: Duration,
}

impl std::fmt::Debug for SensorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorReader")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl SensorReader {
    /// Reader over the real OS.
    #[must_use]
    pub fn os(command_timeout: Duration) -> Self {
        Self::new(Arc::new(OsSystem), command_timeout)
    }

    /// Reader over a caller-supplied system seam.
    #[must_use]
    pub fn new(system: Arc<dyn SystemAccess>, command_timeout: Duration) -> Self {
        Self {
            system,
            command_timeout,
        }
    }

    /// CPU core temperatures: `sensors -u`, then hwmon `coretemp`/`k10temp`.
    pub fn cpu_temps(&self) -> Result<Vec<TempReading>> {
        cpu::read_cpu_temps(self.system.as_ref(), self.command_timeout)
    }

    /// NIC temperature for `iface`: `ethtool -m`, `ethtool -S`, then device hwmon.
    ///
    /// An empty name falls back to the default interface.
    pub fn nic_temp(&self, iface: &str) -> Result<TempReading> {
        let iface = if iface.trim().is_empty() {
            DEFAULT_INTERFACE
        } else {
            iface.trim()
        };
        nic::read_nic_temp(self.system.as_ref(), iface, self.command_timeout)
    }

    /// Best-effort snapshot of everything readable: CPU readings (possibly
    /// empty) and, per requested interface, the NIC reading if any tier
    /// produced one.
    pub fn read_all<S: AsRef<str>>(&self, ifaces: &[S]) -> SensorSnapshot {
        let cpu = self.cpu_temps().unwrap_or_else(|err| {
            tracing::debug!(error = %err, "cpu temperatures unavailable");
            Vec::new()
        });
        let nics = ifaces
            .iter()
            .map(|iface| {
                let iface = iface.as_ref();
                let reading = match self.nic_temp(iface) {
                    Ok(reading) => Some(reading),
                    Err(err) => {
                        tracing::debug!(iface, error = %err, "nic temperature unavailable");
                        None
                    }
                };
                (iface.to_string(), reading)
            })
            .collect();
        SensorSnapshot { cpu, nics }
    }
}

/// Result of [`SensorReader::read_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    /// CPU readings in enumeration order; empty when no tier worked.
    pub cpu: Vec<TempReading>,
    /// One entry per requested interface, in request order.
    pub nics: Vec<(String, Option<TempReading>)>,
}

impl NicTempSource for SensorReader {
    fn nic_temp(&self, iface: &str) -> Result<TempReading> {
        Self::nic_temp(self, iface)
    }
}

/// Parse a trimmed float the way sysfs and tool output present them.
pub(crate) fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
