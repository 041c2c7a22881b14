//! Coordinator configuration.

use crate::membership::DEFAULT_MAX_PEERS;
use crate::protocol::MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`Coordinator`](crate::Coordinator).
///
/// Every field has a default, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SyncConfig {
    /// Service name advertised by the transport
    pub service_name: String,
    /// Maximum number of connected peers; discovery beyond this is rejected
    pub max_peers: usize,
    /// How long an effect anchor stays visible after confirmation
    pub effect_lifetime_ms: u64,
    /// How long a placement waits for the engine's confirmation
    pub placement_timeout_ms: u64,
    /// Inbound messages larger than this are dropped undecoded
    pub max_message_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            service_name: "multiuser-ar".to_string(),
            max_peers: DEFAULT_MAX_PEERS,
            effect_lifetime_ms: 250,
            placement_timeout_ms: 5_000,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn effect_lifetime(&self) -> Duration {
        Duration::from_millis(self.effect_lifetime_ms)
    }

    pub fn placement_timeout(&self) -> Duration {
        Duration::from_millis(self.placement_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.effect_lifetime(), Duration::from_millis(250));
        assert_eq!(config.placement_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_message_size, 50 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"max_peers": 2}"#).unwrap();
        assert_eq!(config.max_peers, 2);
        assert_eq!(config.effect_lifetime_ms, 250);
        assert_eq!(config.service_name, "multiuser-ar");
    }
}
