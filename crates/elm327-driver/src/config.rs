//! Driver configuration

use obd_protocol::AdapterSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the adapter driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Formatting flags sent during initialization
    pub adapter: AdapterSettings,
    /// Send the initialization sequence on start (default: true)
    pub initialize: bool,
    /// Response timeout per query in milliseconds (default: 600)
    pub watchdog_ms: u64,
    /// Inter-poll gap of an idle scheduler in milliseconds (default: 150)
    pub ipg_ms: u64,
    /// Ceiling of the idle poll gap in milliseconds (default: 6000)
    pub max_idle_gap_ms: u64,
    /// Hold each write until the adapter has shown its `>` prompt (default: true)
    pub wait_for_prompt: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterSettings::default(),
            initialize: true,
            watchdog_ms: 600,
            ipg_ms: 150,
            max_idle_gap_ms: 6000,
            wait_for_prompt: true,
        }
    }
}

impl DriverConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn ipg(&self) -> Duration {
        Duration::from_millis(self.ipg_ms.max(1))
    }

    /// Largest multiple of the inter-poll gap an idle scheduler waits
    pub fn max_scaler(&self) -> u32 {
        let scaler = self.max_idle_gap_ms / self.ipg_ms.max(1);
        scaler.clamp(1, u64::from(u32::MAX)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing() {
        let config = DriverConfig::default();
        assert_eq!(config.watchdog(), Duration::from_millis(600));
        assert_eq!(config.ipg(), Duration::from_millis(150));
        assert_eq!(config.max_scaler(), 40);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DriverConfig = serde_json::from_str(r#"{"watchdog_ms": 1000}"#).unwrap();
        assert_eq!(config.watchdog_ms, 1000);
        assert_eq!(config.ipg_ms, 150);
        assert!(config.adapter.headers);
    }
}
