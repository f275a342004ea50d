//! Published messages as seen by the in-RAM backlog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EndpointId, TopicId};

/// Fields removed from messages handed back to external callers.
pub const SKIP_TO_EXTERNAL: &[&str] = &[
    "delivery_status",
    "topic_id",
    "cluster_id",
    "pub_pattern_matched",
    "sub_pattern_matched",
    "published_by_id",
    "data_prefix",
    "data_prefix_short",
    "pub_time",
    "expiration_time",
    "recv_time",
    "pub_msg_id",
    "pub_correl_id",
    "zato_ctx",
];

/// A published message. Payload is shared between all subscriber queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubMessage {
    pub pub_msg_id: String,
    /// Publication time, seconds since the epoch.
    pub pub_time: f64,
    pub topic_id: TopicId,
    pub topic_name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub has_gd: bool,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub expiration: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub correl_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub ext_client_id: Option<String>,
    #[serde(default)]
    pub published_by_id: Option<EndpointId>,
}

impl PubMessage {
    pub fn new(
        pub_msg_id: impl Into<String>,
        pub_time: f64,
        topic_id: TopicId,
        topic_name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            pub_msg_id: pub_msg_id.into(),
            pub_time,
            topic_id,
            topic_name: topic_name.into(),
            data,
            has_gd: false,
            priority: None,
            expiration: None,
            mime_type: None,
            correl_id: None,
            in_reply_to: None,
            ext_client_id: None,
            published_by_id: None,
        }
    }
}

/// One subscriber's copy of a backlog message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMessage {
    pub sub_key: String,
    #[serde(flatten)]
    pub message: Arc<PubMessage>,
}

impl QueuedMessage {
    pub fn pub_msg_id(&self) -> &str {
        &self.message.pub_msg_id
    }

    pub fn pub_time(&self) -> f64 {
        self.message.pub_time
    }
}
