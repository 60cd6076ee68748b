//! Link-speed throttle via `ethtool -s`.

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::SpeedConfig;
use crate::core::errors::{PervigilError, Result};
use crate::platform::system::{OsSystem, SystemAccess};

/// Applies and reverses a fixed link speed on an interface.
///
/// Both operations are idempotent, so a retried transition is harmless.
pub trait SpeedController: Send + Sync {
    /// Force the configured speed, full duplex, auto-negotiation off.
    fn limit(&self, iface: &str) -> Result<()>;
    /// Re-enable auto-negotiation advertising the full capability mask.
    fn restore(&self, iface: &str) -> Result<()>;
}

/// [`SpeedController`] that shells out to `ethtool`.
#[derive(Clone)]
pub struct EthtoolSpeedController {
    system: Arc<dyn SystemAccess>,
    limit_mbps: String,
    advertise_mask: String,
    timeout: Duration,
}

impl std::fmt::Debug for EthtoolSpeedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthtoolSpeedController")
            .field("limit_mbps", &self.limit_mbps)
            .field("advertise_mask", &self.advertise_mask)
            .finish_non_exhaustive()
    }
}

impl EthtoolSpeedController {
    /// Controller that shells out to the host's `ethtool`.
    #[must_use]
    pub fn from_config(config: &SpeedConfig) -> Self {
        Self::new(Arc::new(OsSystem), config)
    }

    /// Controller over an injected system, as used by tests.
    #[must_use]
    pub fn new(system: Arc<dyn SystemAccess>, config: &SpeedConfig) -> Self {
        Self {
            system,
            limit_mbps: config.limit_mbps.to_string(),
            advertise_mask: config.advertise_mask.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    fn ethtool(&self, action: &'static str, iface: &str, args: &[&str]) -> Result<()> {
        self.system
            .run_command("ethtool", args, self.timeout)
            .map(|_| ())
            .map_err(|err| PervigilError::ActionFailed {
                action,
                target: iface.to_string(),
                details: err.to_string(),
            })
    }
}

impl SpeedController for EthtoolSpeedController {
    fn limit(&self, iface: &str) -> Result<()> {
        tracing::info!(iface, mbps = %self.limit_mbps, "limiting link speed");
        self.ethtool(
            "limit",
            iface,
            &[
                "-s",
                iface,
                "speed",
                &self.limit_mbps,
                "duplex",
                "full",
                "autoneg",
                "off",
            ],
        )
    }

    fn restore(&self, iface: &str) -> Result<()> {
        tracing::info!(iface, advertise = %self.advertise_mask, "restoring auto-negotiation");
        self.ethtool(
            "restore",
            iface,
            &["-s", iface, "autoneg", "on", "advertise", &self.advertise_mask],
        )
    }
}
