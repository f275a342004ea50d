//! Topic capacity limits and synchronization cadence.
//!
//! Applied to topics created through the public façade when the caller
//! does not override them.
//!
//! | Setting                 | Default  | Notes                                  |
//! |-------------------------|----------|----------------------------------------|
//! | task_sync_interval      | 500 ms   | How often the sync loop visits a topic |
//! | task_delivery_interval  | 2000 ms  | Delivery task polling cadence          |
//! | depth_check_freq        | 100      | Publishes between GD depth checks      |
//! | max_depth_gd            | 10,000   | Durable queue capacity                 |
//! | max_depth_non_gd        | 1,000    | In-RAM queue capacity per subscriber   |
//! | delivery_batch_size     | 500      | Messages per delivery batch            |

use serde::Deserialize;

pub const DEFAULT_TASK_SYNC_INTERVAL_MS: u64 = 500;
pub const DEFAULT_TASK_DELIVERY_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_DEPTH_CHECK_FREQ: u32 = 100;
pub const DEFAULT_MAX_DEPTH_GD: usize = 10_000;
pub const DEFAULT_MAX_DEPTH_NON_GD: usize = 1_000;
pub const DEFAULT_PUB_BUFFER_SIZE_GD: usize = 0;
pub const DEFAULT_DELIVERY_BATCH_SIZE: u32 = 500;

/// Defaults for newly created topics and subscriptions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicDefaults {
    /// How often, in milliseconds, the sync loop may notify a topic's delivery tasks.
    pub task_sync_interval_ms: u64,
    /// How often, in milliseconds, delivery tasks poll for new messages.
    pub task_delivery_interval_ms: u64,
    /// Publishes between checks of the durable queue depth.
    pub depth_check_freq: u32,
    /// Capacity of the durable queue.
    pub max_depth_gd: usize,
    /// Capacity of each subscriber's in-RAM queue.
    pub max_depth_non_gd: usize,
    /// Durable messages buffered before a write.
    pub pub_buffer_size_gd: usize,
    /// Messages per delivery batch.
    pub delivery_batch_size: u32,
}

impl Default for TopicDefaults {
    fn default() -> Self {
        Self {
            task_sync_interval_ms: DEFAULT_TASK_SYNC_INTERVAL_MS,
            task_delivery_interval_ms: DEFAULT_TASK_DELIVERY_INTERVAL_MS,
            depth_check_freq: DEFAULT_DEPTH_CHECK_FREQ,
            max_depth_gd: DEFAULT_MAX_DEPTH_GD,
            max_depth_non_gd: DEFAULT_MAX_DEPTH_NON_GD,
            pub_buffer_size_gd: DEFAULT_PUB_BUFFER_SIZE_GD,
            delivery_batch_size: DEFAULT_DELIVERY_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topic_limits() {
        let defaults = TopicDefaults::default();
        assert_eq!(defaults.task_sync_interval_ms, 500);
        assert_eq!(defaults.max_depth_gd, 10_000);
        assert_eq!(defaults.max_depth_non_gd, 1_000);
        assert_eq!(defaults.delivery_batch_size, 500);
    }
}
