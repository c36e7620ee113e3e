use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable bounds governing a channel pool, one per destination class.
///
/// The time fields are carried as plain milliseconds so a configuration
/// loader can hand them over as raw numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard ceiling on concurrently open channels per destination.
    pub max_active: usize,
    /// Channels kept warm per destination even when idle.
    pub min_active: usize,
    /// A channel idle longer than this becomes eligible for reclamation.
    pub max_idle_time_ms: u64,
    /// Maximum time an acquire call may wait before failing.
    pub get_channel_timeout_ms: u64,
}

impl PoolConfig {
    /// Returns the idle reclamation threshold.
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    /// Returns the acquire wait bound.
    pub fn get_channel_timeout(&self) -> Duration {
        Duration::from_millis(self.get_channel_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_plain_numbers() {
        let raw = r#"{
            "max_active": 8,
            "min_active": 2,
            "max_idle_time_ms": 30000,
            "get_channel_timeout_ms": 5000
        }"#;

        let config: PoolConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.max_active, 8);
        assert_eq!(config.min_active, 2);
        assert_eq!(config.max_idle_time(), Duration::from_secs(30));
        assert_eq!(config.get_channel_timeout(), Duration::from_secs(5));
    }
}
