//! CPU core temperatures: lm-sensors first, kernel hwmon second.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::{TempReading, parse_float};
use crate::core::errors::Result;
use crate::platform::system::SystemAccess;

/// hwmon chip drivers that report CPU package/core temperatures.
pub const CPU_HWMON_DRIVERS: [&str; 2] = ["coretemp", "k10temp"];

/// Glob over every hwmon temperature input on the host.
pub const CPU_HWMON_GLOB: &str = "/sys/class/hwmon/hwmon*/temp*_input";

/// A core/processor label line followed by its `tempN_input:` value line.
static SENSORS_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Core \d+|Tctl|CPU)[^\n]*\n\s+temp\d+_input:\s+([\d.]+)")
        .expect("sensors pattern is a valid literal")
});

/// Parse `sensors -u` output into readings, in output order.
#[must_use]
pub fn parse_sensors_output(output: &str) -> Vec<TempReading> {
    SENSORS_PAIR
        .captures_iter(output)
        .filter_map(|caps| {
            let value = parse_float(&caps[2])?;
            Some(TempReading::new(&caps[1], value))
        })
        .collect()
}

/// Try lm-sensors; fall back to hwmon when it is missing or reports nothing.
pub fn read_cpu_temps(system: &dyn SystemAccess, timeout: Duration) -> Result<Vec<TempReading>> {
    match system.run_command("sensors", &["-u"], timeout) {
        Ok(out) => {
            let temps = parse_sensors_output(&String::from_utf8_lossy(&out));
            if !temps.is_empty() {
                return Ok(temps);
            }
            tracing::debug!("sensors -u produced no core readings, trying hwmon");
        }
        Err(err) => tracing::debug!(error = %err, "sensors -u unavailable, trying hwmon"),
    }
    read_cpu_hwmon(system)
}

/// Enumerate `coretemp`/`k10temp` hwmon inputs, converting millidegrees.
pub fn read_cpu_hwmon(system: &dyn SystemAccess) -> Result<Vec<TempReading>> {
    let mut temps = Vec::new();

    for input in system.glob(CPU_HWMON_GLOB)? {
        let Some(dir) = input.parent() else {
            continue;
        };
        let chip = read_trimmed(system, &dir.join("name")).unwrap_or_default();
        if !CPU_HWMON_DRIVERS.contains(&chip.as_str()) {
            continue;
        }

        let label = label_path(&input)
            .and_then(|p| read_trimmed(system, &p))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| chip.clone());

        let Some(millidegrees) = read_trimmed(system, &input).and_then(|raw| parse_float(&raw))
        else {
            continue;
        };
        temps.push(TempReading::new(label, millidegrees / 1000.0));
    }

    Ok(temps)
}

fn read_trimmed(system: &dyn SystemAccess, path: &Path) -> Option<String> {
    system
        .read_file(path)
        .ok()
        .map(|raw| String::from_utf8_lossy(&raw).trim().to_string())
}

/// `temp3_input` -> sibling `temp3_label`.
fn label_path(input: &Path) -> Option<std::path::PathBuf> {
    let name = input.file_name()?.to_str()?;
    let stem = name.strip_suffix("_input")?;
    Some(input.with_file_name(format!("{stem}_label")))
}
