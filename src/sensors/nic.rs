//! NIC temperature: SFP module EEPROM, driver statistics, then device hwmon.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::{TempReading, parse_float};
use crate::core::errors::{PervigilError, Result};
use crate::platform::system::SystemAccess;

static MODULE_TEMPERATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Module temperature\s*:\s*([\d.]+)")
        .expect("module temperature pattern is a valid literal")
});

// ixgbe and friends expose the sensor as a plain `temp:` statistic.
static STATS_TEMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"temp:\s*([\d.]+)")
        .expect("stats temp pattern is a valid literal")
});

/// `ethtool -m` module EEPROM dump -> degrees.
#[must_use]
pub fn parse_module_temperature(output: &str) -> Option<f64> {
    MODULE_TEMPERATURE
        .captures(output)
        .and_then(|caps| parse_float(&caps[1]))
}

/// `ethtool -S` statistics dump -> degrees.
#[must_use]
pub fn parse_stats_temperature(output: &str) -> Option<f64> {
    STATS_TEMP
        .captures(output)
        .and_then(|caps| parse_float(&caps[1]))
}

/// hwmon inputs under the network device's sysfs entry.
#[must_use]
pub fn nic_hwmon_glob(iface: &str) -> String {
    format!("/sys/class/net/{iface}/device/hwmon/hwmon*/temp*_input")
}

/// Walk the three tiers; the first success wins.
pub fn read_nic_temp(
    system: &dyn SystemAccess,
    iface: &str,
    timeout: Duration,
) -> Result<TempReading> {
    if let Some(value) = command_tier(system, "-m", iface, timeout, parse_module_temperature) {
        return Ok(TempReading::new(iface, value));
    }
    if let Some(value) = command_tier(system, "-S", iface, timeout, parse_stats_temperature) {
        return Ok(TempReading::new(iface, value));
    }
    read_nic_hwmon(system, iface)
}

fn command_tier(
    system: &dyn SystemAccess,
    flag: &str,
    iface: &str,
    timeout: Duration,
    parse: fn(&str) -> Option<f64>,
) -> Option<f64> {
    match system.run_command("ethtool", &[flag, iface], timeout) {
        Ok(out) => {
            let value = parse(&String::from_utf8_lossy(&out));
            if value.is_none() {
                tracing::debug!(iface, flag, "ethtool output has no temperature");
            }
            value
        }
        Err(err) => {
            tracing::debug!(iface, flag, error = %err, "ethtool tier failed");
            None
        }
    }
}

/// First hwmon input under the device, millidegrees -> degrees.
pub fn read_nic_hwmon(system: &dyn SystemAccess, iface: &str) -> Result<TempReading> {
    let inputs = system.glob(&nic_hwmon_glob(iface))?;
    let Some(first) = inputs.first() else {
        return Err(PervigilError::SensorUnavailable {
            details: format!("no hwmon for {iface}"),
        });
    };

    let raw = system.read_file(first)?;
    let millidegrees =
        parse_float(&String::from_utf8_lossy(&raw)).ok_or_else(|| PervigilError::SensorUnavailable {
            details: format!("unparseable hwmon value at {}", first.display()),
        })?;
    Ok(TempReading::new(iface, millidegrees / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::fake::FakeSystem;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn parses_module_temperature_line() {
        let out = "\tIdentifier : 0x03 (SFP)\n\tModule temperature : 55.50 degrees C / 131.90 degrees F\n";
        assert_eq!(parse_module_temperature(out), Some(55.5));
        assert_eq!(parse_module_temperature("Identifier : 0x03"), None);
    }

    #[test]
    fn parses_stats_temp_line() {
        let out = "NIC statistics:\n     rx_packets: 10\n     temp: 65\n";
        assert_eq!(parse_stats_temperature(out), Some(65.0));
    }

    #[test]
    fn module_tier_wins() {
        let system = FakeSystem::default().with_output("ethtool -m eth1", "Module temperature : 55.5");
        let reading = read_nic_temp(&system, "eth1", T).unwrap();
        assert_eq!(reading, TempReading::new("eth1", 55.5));
        assert_eq!(system.calls(), vec!["ethtool -m eth1"]);
    }

    #[test]
    fn falls_back_to_stats_when_module_fails() {
        let system = FakeSystem::default()
            .with_failure("ethtool -m eth1", "no EEPROM")
            .with_output("ethtool -S eth1", "temp: 65.0");
        let reading = read_nic_temp(&system, "eth1", T).unwrap();
        assert!((reading.value - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn falls_back_to_stats_when_module_pattern_absent() {
        let system = FakeSystem::default()
            .with_output("ethtool -m eth1", "Identifier : 0x03 (SFP)")
            .with_output("ethtool -S eth1", "temp: 58");
        let reading = read_nic_temp(&system, "eth1", T).unwrap();
        assert!((reading.value - 58.0).abs() < f64::EPSILON);
    }

    #[test]
    fn falls_back_to_hwmon() {
        let path = "/sys/class/net/eth1/device/hwmon/hwmon0/temp1_input";
        let system = FakeSystem::default()
            .with_failure("ethtool -m eth1", "no EEPROM")
            .with_failure("ethtool -S eth1", "no stats")
            .with_glob(&nic_hwmon_glob("eth1"), &[path])
            .with_file(path, "70000\n");
        let reading = read_nic_temp(&system, "eth1", T).unwrap();
        assert_eq!(reading, TempReading::new("eth1", 70.0));
    }

    #[test]
    fn all_tiers_failing_reports_no_hwmon() {
        let system = FakeSystem::default();
        let err = read_nic_temp(&system, "eth7", T).unwrap_err();
        assert!(matches!(err, PervigilError::SensorUnavailable { .. }));
        assert!(err.to_string().contains("no hwmon for eth7"));
    }
}
