//! Topics and their synchronization state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::TopicId;
use crate::config::{
    DEFAULT_DEPTH_CHECK_FREQ, DEFAULT_MAX_DEPTH_GD, DEFAULT_MAX_DEPTH_NON_GD,
    DEFAULT_PUB_BUFFER_SIZE_GD, DEFAULT_TASK_DELIVERY_INTERVAL_MS, DEFAULT_TASK_SYNC_INTERVAL_MS,
};
use crate::hooks::HookBindings;

/// What to do with a message published to a topic without subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnNoSubsPub {
    /// Keep the message until a subscriber shows up.
    #[default]
    Accept,
    /// Drop the message.
    Drop,
}

/// Topic definition as delivered by the administrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub id: TopicId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_internal: bool,
    #[serde(default = "default_true")]
    pub is_api_sub_allowed: bool,
    /// Whether messages are persisted to the durable store by default.
    #[serde(default)]
    pub has_gd: bool,
    #[serde(default)]
    pub on_no_subs_pub: OnNoSubsPub,
    #[serde(default)]
    pub hook_service_id: Option<i64>,
    /// Service implementing this topic's hooks, if any.
    #[serde(default)]
    pub hook_service_name: Option<String>,
    #[serde(default = "default_task_sync_interval_ms")]
    pub task_sync_interval_ms: u64,
    #[serde(default = "default_task_delivery_interval_ms")]
    pub task_delivery_interval_ms: u64,
    #[serde(default = "default_depth_check_freq")]
    pub depth_check_freq: u32,
    #[serde(default = "default_max_depth_gd")]
    pub max_depth_gd: usize,
    /// Per-subscriber capacity of the in-RAM backlog.
    #[serde(default = "default_max_depth_non_gd")]
    pub max_depth_non_gd: usize,
    #[serde(default = "default_pub_buffer_size_gd")]
    pub pub_buffer_size_gd: usize,
    /// Send backlog overflow to the overflow log instead of dropping it.
    #[serde(default = "default_true")]
    pub use_overflow_log: bool,
}

fn default_true() -> bool {
    true
}

fn default_task_sync_interval_ms() -> u64 {
    DEFAULT_TASK_SYNC_INTERVAL_MS
}

fn default_task_delivery_interval_ms() -> u64 {
    DEFAULT_TASK_DELIVERY_INTERVAL_MS
}

fn default_depth_check_freq() -> u32 {
    DEFAULT_DEPTH_CHECK_FREQ
}

fn default_max_depth_gd() -> usize {
    DEFAULT_MAX_DEPTH_GD
}

fn default_max_depth_non_gd() -> usize {
    DEFAULT_MAX_DEPTH_NON_GD
}

fn default_pub_buffer_size_gd() -> usize {
    DEFAULT_PUB_BUFFER_SIZE_GD
}

impl TopicConfig {
    /// Create a config with default limits and cadence.
    pub fn new(id: TopicId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
            is_internal: false,
            is_api_sub_allowed: true,
            has_gd: false,
            on_no_subs_pub: OnNoSubsPub::Accept,
            hook_service_id: None,
            hook_service_name: None,
            task_sync_interval_ms: DEFAULT_TASK_SYNC_INTERVAL_MS,
            task_delivery_interval_ms: DEFAULT_TASK_DELIVERY_INTERVAL_MS,
            depth_check_freq: DEFAULT_DEPTH_CHECK_FREQ,
            max_depth_gd: DEFAULT_MAX_DEPTH_GD,
            max_depth_non_gd: DEFAULT_MAX_DEPTH_NON_GD,
            pub_buffer_size_gd: DEFAULT_PUB_BUFFER_SIZE_GD,
            use_overflow_log: true,
        }
    }

    pub fn with_gd(mut self, has_gd: bool) -> Self {
        self.has_gd = has_gd;
        self
    }

    pub fn with_max_depth_non_gd(mut self, max_depth: usize) -> Self {
        self.max_depth_non_gd = max_depth;
        self
    }

    pub fn with_task_sync_interval_ms(mut self, interval_ms: u64) -> Self {
        self.task_sync_interval_ms = interval_ms;
        self
    }

    pub fn with_hook_service(mut self, service_name: impl Into<String>) -> Self {
        self.hook_service_name = Some(service_name.into());
        self
    }
}

/// A topic known to this process.
///
/// `sync_has_gd_msg` and `sync_has_non_gd_msg` are the conservative
/// "may have pending messages" signal read by the sync loop.
/// `gd_pub_time_max` never moves backwards.
#[derive(Debug, Clone)]
pub struct Topic {
    pub config: TopicConfig,
    pub hooks: HookBindings,
    pub sync_has_gd_msg: bool,
    pub sync_has_non_gd_msg: bool,
    pub gd_pub_time_max: f64,
    pub server_name: String,
    pub server_pid: u32,
    last_synced: Instant,
}

impl Topic {
    pub fn new(config: TopicConfig, hooks: HookBindings, server_name: &str, server_pid: u32) -> Self {
        Self {
            config,
            hooks,
            sync_has_gd_msg: false,
            sync_has_non_gd_msg: false,
            gd_pub_time_max: 0.0,
            server_name: server_name.to_string(),
            server_pid,
            last_synced: Instant::now(),
        }
    }

    pub fn id(&self) -> TopicId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn has_gd(&self) -> bool {
        self.config.has_gd
    }

    pub fn max_depth_non_gd(&self) -> usize {
        self.config.max_depth_non_gd
    }

    pub fn task_sync_interval(&self) -> Duration {
        Duration::from_millis(self.config.task_sync_interval_ms)
    }

    /// Whether the sync interval has elapsed since the last pass.
    pub fn needs_task_sync(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_synced) >= self.task_sync_interval()
    }

    pub fn update_task_sync_time(&mut self, now: Instant) {
        self.last_synced = now;
    }

    pub fn has_pending_sync(&self) -> bool {
        self.sync_has_gd_msg || self.sync_has_non_gd_msg
    }

    /// Raise the durable high-water mark, ignoring lower values.
    pub fn raise_gd_pub_time_max(&mut self, pub_time: f64) {
        if pub_time > self.gd_pub_time_max {
            self.gd_pub_time_max = pub_time;
        }
    }

    /// Carry synchronization state over from a previous incarnation.
    pub(crate) fn inherit_sync_state(&mut self, previous: &Topic) {
        self.sync_has_gd_msg = previous.sync_has_gd_msg;
        self.sync_has_non_gd_msg = previous.sync_has_non_gd_msg;
        self.gd_pub_time_max = previous.gd_pub_time_max;
        self.last_synced = previous.last_synced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_config_defaults() {
        let config = TopicConfig::new(1, "/orders");
        assert_eq!(config.task_sync_interval_ms, 500);
        assert_eq!(config.max_depth_gd, 10_000);
        assert_eq!(config.max_depth_non_gd, 1_000);
        assert!(config.use_overflow_log);
        assert!(!config.has_gd);
    }

    #[test]
    fn test_topic_config_deserialize_fills_defaults() {
        let config: TopicConfig =
            serde_json::from_str(r#"{"id": 7, "name": "/invoices", "has_gd": true}"#).unwrap();
        assert_eq!(config.id, 7);
        assert!(config.has_gd);
        assert!(config.is_active);
        assert_eq!(config.depth_check_freq, 100);
        assert_eq!(config.on_no_subs_pub, OnNoSubsPub::Accept);
    }

    #[test]
    fn test_gd_pub_time_max_never_regresses() {
        let mut topic = Topic::new(TopicConfig::new(1, "/orders"), HookBindings::none(), "srv", 1);
        topic.raise_gd_pub_time_max(10.5);
        topic.raise_gd_pub_time_max(3.0);
        assert_eq!(topic.gd_pub_time_max, 10.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_task_sync_after_interval() {
        let config = TopicConfig::new(1, "/orders").with_task_sync_interval_ms(100);
        let mut topic = Topic::new(config, HookBindings::none(), "srv", 1);
        let start = Instant::now();
        topic.update_task_sync_time(start);

        assert!(!topic.needs_task_sync(start + Duration::from_millis(50)));
        assert!(topic.needs_task_sync(start + Duration::from_millis(100)));
    }
}
