use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ws::HeartbeatConfig;

/// Timing knobs for the sync stack, loadable from a JSON file.
/// Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_edit_idle")]
    pub edit_idle_ms: u64,
    #[serde(default = "default_auto_save_delay")]
    pub auto_save_delay_ms: u64,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    30000
}

fn default_heartbeat_timeout() -> u64 {
    60000
}

fn default_ping_interval() -> u64 {
    1000
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_edit_idle() -> u64 {
    500
}

fn default_auto_save_delay() -> u64 {
    1000
}

fn default_events_capacity() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            ping_interval_ms: default_ping_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            edit_idle_ms: default_edit_idle(),
            auto_save_delay_ms: default_auto_save_delay(),
            events_capacity: default_events_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn edit_idle(&self) -> Duration {
        Duration::from_millis(self.edit_idle_ms)
    }

    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_millis(self.auto_save_delay_ms)
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(self.heartbeat_interval_ms),
            timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.heartbeat().ping_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_partial_config() {
        let json = r#"{
            "poll_interval_ms": 2000,
            "edit_idle_ms": 750
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.edit_idle(), Duration::from_millis(750));
        assert_eq!(config.auto_save_delay_ms, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"reconnect_delay_ms": 100}"#).unwrap();

        let config = SyncConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(100));
        assert!(SyncConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
