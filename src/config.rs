//! Recovery configuration file
//!
//! Small JSON config for the knobs the recovery UI exposes. Device paths,
//! the attempt limit, and the helper contract are deliberately NOT
//! configurable; they are fixed constants of the pipeline.

use crate::error::{RecoveryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_power_poll_secs() -> u64 {
    5
}

/// User-tunable recovery options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Shut the device down after this many seconds of inactivity.
    /// 0 disables the idle timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// How often the power monitor samples battery and charger state.
    #[serde(default = "default_power_poll_secs")]
    pub power_poll_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 0,
            power_poll_secs: default_power_poll_secs(),
        }
    }
}

impl RecoveryConfig {
    /// Load a config from a JSON file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RecoveryError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check values.
    pub fn validate(&self) -> Result<()> {
        if self.power_poll_secs == 0 {
            return Err(RecoveryError::config(
                "power_poll_secs must be at least 1",
            ));
        }
        Ok(())
    }
}
