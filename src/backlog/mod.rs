//! In-RAM backlog of non-GD messages.
//!
//! Messages are scoped per topic and queued per sub_key. A message fanned
//! out to several subscribers is stored once and shared by reference; each
//! subscriber's queue holds its ID. Messages are removed from the backlog
//! when handed to the sync loop, not when delivery is confirmed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::model::{PubMessage, QueuedMessage, TopicId};

/// Log target receiving messages that did not fit in a subscriber's queue.
pub const OVERFLOW_LOG_TARGET: &str = "pubsub_overflow";

/// Side channel for messages exceeding a topic's non-GD capacity.
pub trait OverflowSink: Send + Sync {
    fn overflow(&self, topic_name: &str, sub_key: &str, msg: &PubMessage);
}

/// Writes overflowed messages to the `pubsub_overflow` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOverflowSink;

impl OverflowSink for TracingOverflowSink {
    fn overflow(&self, topic_name: &str, sub_key: &str, msg: &PubMessage) {
        let data = serde_json::to_string(msg).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        info!(
            target: OVERFLOW_LOG_TARGET,
            topic = %topic_name,
            sub_key = %sub_key,
            pub_msg_id = %msg.pub_msg_id,
            msg = %data,
            "Overflowed non-GD message"
        );
    }
}

/// Capacity settings of the topic receiving a batch.
#[derive(Debug, Clone, Copy)]
pub struct BacklogLimits {
    /// Maximum queue length per sub_key.
    pub max_depth: usize,
    /// Send overflow to the sink instead of dropping it.
    pub use_overflow_log: bool,
}

#[derive(Debug)]
struct BacklogEntry {
    message: Arc<PubMessage>,
    /// Sub keys whose queues still reference this message.
    owed: HashSet<String>,
}

#[derive(Debug, Default)]
struct TopicBacklog {
    messages: HashMap<String, BacklogEntry>,
    queues: HashMap<String, VecDeque<String>>,
}

impl TopicBacklog {
    fn release(&mut self, msg_id: &str, sub_key: &str) {
        if let Some(entry) = self.messages.get_mut(msg_id) {
            entry.owed.remove(sub_key);
            if entry.owed.is_empty() {
                self.messages.remove(msg_id);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.queues.values().all(VecDeque::is_empty)
    }
}

/// Per-topic, per-sub_key queues of not-yet-delivered non-GD messages.
pub struct InRamBacklog {
    topics: HashMap<TopicId, TopicBacklog>,
    overflow: Arc<dyn OverflowSink>,
}

impl std::fmt::Debug for InRamBacklog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InRamBacklog")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl InRamBacklog {
    pub fn new(overflow: Arc<dyn OverflowSink>) -> Self {
        Self {
            topics: HashMap::new(),
            overflow,
        }
    }

    /// Queue messages for each sub_key, preserving their order.
    ///
    /// Each queue accepts messages up to `limits.max_depth`; the rest go to
    /// the overflow sink, or are dropped if the topic does not use the
    /// overflow log. Never fails.
    pub fn add_messages(
        &mut self,
        cid: &str,
        topic_id: TopicId,
        topic_name: &str,
        limits: BacklogLimits,
        sub_keys: &[String],
        messages: Vec<PubMessage>,
    ) {
        let messages: Vec<Arc<PubMessage>> = messages.into_iter().map(Arc::new).collect();
        let backlog = self.topics.entry(topic_id).or_default();
        let mut overflowed = 0usize;

        for sub_key in sub_keys {
            let queue = backlog.queues.entry(sub_key.clone()).or_default();

            for msg in &messages {
                if queue.len() >= limits.max_depth {
                    overflowed += 1;
                    if limits.use_overflow_log {
                        self.overflow.overflow(topic_name, sub_key, msg);
                    }
                    continue;
                }

                queue.push_back(msg.pub_msg_id.clone());
                backlog
                    .messages
                    .entry(msg.pub_msg_id.clone())
                    .or_insert_with(|| BacklogEntry {
                        message: Arc::clone(msg),
                        owed: HashSet::new(),
                    })
                    .owed
                    .insert(sub_key.clone());
            }
        }

        debug!(
            cid = %cid,
            topic = %topic_name,
            sub_keys = ?sub_keys,
            messages = messages.len(),
            overflowed,
            "Added messages to backlog"
        );

        if overflowed > 0 && !limits.use_overflow_log {
            info!(topic = %topic_name, overflowed, "Dropped non-GD messages over capacity");
        }
    }

    /// Remove and return every message queued for `sub_keys`, sorted by
    /// publication time.
    pub fn get_delete_messages_by_sub_keys(
        &mut self,
        topic_id: TopicId,
        sub_keys: &[String],
    ) -> Vec<QueuedMessage> {
        let Some(backlog) = self.topics.get_mut(&topic_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for sub_key in sub_keys {
            let Some(queue) = backlog.queues.remove(sub_key) else {
                continue;
            };
            for msg_id in queue {
                if let Some(entry) = backlog.messages.get(&msg_id) {
                    out.push(QueuedMessage {
                        sub_key: sub_key.clone(),
                        message: Arc::clone(&entry.message),
                    });
                }
                backlog.release(&msg_id, sub_key);
            }
        }

        if backlog.is_empty() {
            self.topics.remove(&topic_id);
        }

        out.sort_by(|a, b| a.pub_time().total_cmp(&b.pub_time()));
        out
    }

    /// Messages queued for a sub_key, oldest first, without removing them.
    pub fn pending(&self, topic_id: TopicId, sub_key: &str) -> Vec<Arc<PubMessage>> {
        self.topics
            .get(&topic_id)
            .and_then(|backlog| {
                backlog.queues.get(sub_key).map(|queue| {
                    queue
                        .iter()
                        .filter_map(|msg_id| backlog.messages.get(msg_id))
                        .map(|entry| Arc::clone(&entry.message))
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    pub fn has_messages_for_sub_key(&self, topic_id: TopicId, sub_key: &str) -> bool {
        self.topics
            .get(&topic_id)
            .and_then(|backlog| backlog.queues.get(sub_key))
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Whether a sub_key has messages queued under any topic.
    pub fn has_messages_by_sub_key(&self, sub_key: &str) -> bool {
        self.topics
            .keys()
            .any(|topic_id| self.has_messages_for_sub_key(*topic_id, sub_key))
    }

    /// Number of distinct messages held for a topic.
    pub fn topic_depth(&self, topic_id: TopicId) -> usize {
        self.topics
            .get(&topic_id)
            .map(|backlog| backlog.messages.len())
            .unwrap_or(0)
    }

    /// Drop the queues of `sub_keys` and release the messages they held.
    pub fn unsubscribe(&mut self, topic_id: TopicId, topic_name: &str, sub_keys: &[String]) {
        let Some(backlog) = self.topics.get_mut(&topic_id) else {
            return;
        };

        for sub_key in sub_keys {
            if let Some(queue) = backlog.queues.remove(sub_key) {
                for msg_id in queue {
                    backlog.release(&msg_id, sub_key);
                }
            }
        }

        if backlog.is_empty() {
            self.topics.remove(&topic_id);
        }

        debug!(topic = %topic_name, sub_keys = ?sub_keys, "Removed sub_keys from backlog");
    }

    /// Forget everything held for a topic.
    pub fn drop_topic(&mut self, topic_id: TopicId) -> usize {
        self.topics
            .remove(&topic_id)
            .map(|backlog| backlog.messages.len())
            .unwrap_or(0)
    }
}
