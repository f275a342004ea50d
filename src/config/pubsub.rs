//! Broker runtime settings.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_SYNC_SLEEP_MS: u64 = 10;
pub const DEFAULT_WAIT_FOR_TOPIC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WAIT_FOR_TOPIC_POLL_MS: u64 = 1000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_ENDPOINT_META_STORE_FREQUENCY: u64 = 10;

/// Column widths of the delivery owner table: index, sub_key, server name,
/// pid, creation time, details.
pub const DEFAULT_OWNER_TABLE_COLUMNS: [usize; 6] = [6, 15, 8, 6, 17, 80];

pub const DEFAULT_INTERNAL_ENDPOINT_NAME: &str = "pubsub.default.internal.endpoint";
pub const DEFAULT_SERVICE_ENDPOINT_NAME: &str = "pubsub.service.endpoint";

/// Settings for the broker instance and its sync loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Pause between sync loop iterations, in milliseconds.
    pub sync_sleep_ms: u64,
    /// Stop the sync loop after this many iterations. Unbounded if unset.
    pub sync_max_iters: Option<u64>,
    /// Warn when no delivery server is found for a non-websocket sub_key.
    pub log_if_deliv_server_not_found: bool,
    /// Warn when no delivery server is found for a websocket sub_key.
    pub log_if_wsx_deliv_server_not_found: bool,
    pub owner_table_columns: [usize; 6],
    /// How long to wait for a topic to appear before giving up.
    pub wait_for_topic_timeout_secs: u64,
    pub wait_for_topic_poll_ms: u64,
    /// Upper bound of a remote owner lookup.
    pub rpc_timeout_ms: u64,
    /// Every how many publishes an endpoint's metadata is refreshed.
    pub endpoint_meta_store_frequency: u64,
    /// Endpoint publishing on behalf of callers that give no identity.
    pub default_internal_endpoint_name: String,
    /// Endpoint subscribed to topics that carry messages for services.
    pub service_endpoint_name: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            sync_sleep_ms: DEFAULT_SYNC_SLEEP_MS,
            sync_max_iters: None,
            log_if_deliv_server_not_found: true,
            log_if_wsx_deliv_server_not_found: false,
            owner_table_columns: DEFAULT_OWNER_TABLE_COLUMNS,
            wait_for_topic_timeout_secs: DEFAULT_WAIT_FOR_TOPIC_TIMEOUT_SECS,
            wait_for_topic_poll_ms: DEFAULT_WAIT_FOR_TOPIC_POLL_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            endpoint_meta_store_frequency: DEFAULT_ENDPOINT_META_STORE_FREQUENCY,
            default_internal_endpoint_name: DEFAULT_INTERNAL_ENDPOINT_NAME.to_string(),
            service_endpoint_name: DEFAULT_SERVICE_ENDPOINT_NAME.to_string(),
        }
    }
}

impl PubSubConfig {
    pub fn sync_sleep(&self) -> Duration {
        Duration::from_millis(self.sync_sleep_ms)
    }

    pub fn wait_for_topic_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_for_topic_timeout_secs)
    }

    pub fn wait_for_topic_poll(&self) -> Duration {
        Duration::from_millis(self.wait_for_topic_poll_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubsub_config_default() {
        let config = PubSubConfig::default();
        assert_eq!(config.sync_sleep(), Duration::from_millis(10));
        assert!(config.sync_max_iters.is_none());
        assert!(config.log_if_deliv_server_not_found);
        assert!(!config.log_if_wsx_deliv_server_not_found);
        assert_eq!(config.owner_table_columns, [6, 15, 8, 6, 17, 80]);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(5));
    }
}
