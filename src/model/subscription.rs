//! Subscriptions: a subscriber's binding to a topic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ClusterId, EndpointId, EndpointType, TopicId};
use crate::config::DEFAULT_DELIVERY_BATCH_SIZE;

/// Subscription definition as created by the subscription services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub id: i64,
    pub sub_key: String,
    pub topic_id: TopicId,
    pub topic_name: String,
    pub endpoint_id: EndpointId,
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub cluster_id: ClusterId,
    /// Server configured to run the delivery task, if pinned.
    #[serde(default)]
    pub server_id: Option<i64>,
    #[serde(default)]
    pub ext_client_id: Option<String>,
    #[serde(default = "default_delivery_batch_size")]
    pub delivery_batch_size: u32,
    #[serde(default = "default_true")]
    pub wrap_one_msg_in_list: bool,
    #[serde(default)]
    pub sub_pattern_matched: Option<String>,
    #[serde(default)]
    pub is_internal: bool,
    #[serde(default)]
    pub creation_time: f64,
    /// Implementation-specific overrides.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_delivery_batch_size() -> u32 {
    DEFAULT_DELIVERY_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

impl SubscriptionConfig {
    pub fn new(
        sub_key: impl Into<String>,
        topic_id: TopicId,
        topic_name: impl Into<String>,
        endpoint_id: EndpointId,
        endpoint_type: EndpointType,
    ) -> Self {
        Self {
            id: 0,
            sub_key: sub_key.into(),
            topic_id,
            topic_name: topic_name.into(),
            endpoint_id,
            endpoint_type,
            cluster_id: 0,
            server_id: None,
            ext_client_id: None,
            delivery_batch_size: DEFAULT_DELIVERY_BATCH_SIZE,
            wrap_one_msg_in_list: true,
            sub_pattern_matched: None,
            is_internal: false,
            creation_time: 0.0,
            extra: Map::new(),
        }
    }
}

/// A live subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub config: SubscriptionConfig,
    pub last_interaction_time: Option<f64>,
    pub last_interaction_type: Option<String>,
}

impl Subscription {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            config,
            last_interaction_time: None,
            last_interaction_type: None,
        }
    }

    pub fn sub_key(&self) -> &str {
        &self.config.sub_key
    }

    pub fn topic_name(&self) -> &str {
        &self.config.topic_name
    }

    pub fn topic_id(&self) -> TopicId {
        self.config.topic_id
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.config.endpoint_id
    }

    pub fn endpoint_type(&self) -> EndpointType {
        self.config.endpoint_type
    }

    pub fn is_wsx(&self) -> bool {
        self.config.endpoint_type == EndpointType::WebSockets
    }

    /// Pattern matched when subscribing, or a placeholder for log output.
    pub fn sub_pattern_matched(&self) -> Option<&str> {
        self.config.sub_pattern_matched.as_deref()
    }
}

/// Partial update applied by `edit_subscription`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionUpdate {
    pub delivery_batch_size: Option<u32>,
    pub wrap_one_msg_in_list: Option<bool>,
    pub ext_client_id: Option<String>,
    pub last_interaction_time: Option<f64>,
    pub last_interaction_type: Option<String>,
    pub extra: Map<String, Value>,
}

impl SubscriptionUpdate {
    pub fn apply(self, sub: &mut Subscription) {
        if let Some(size) = self.delivery_batch_size {
            sub.config.delivery_batch_size = size;
        }
        if let Some(wrap) = self.wrap_one_msg_in_list {
            sub.config.wrap_one_msg_in_list = wrap;
        }
        if let Some(ext_client_id) = self.ext_client_id {
            sub.config.ext_client_id = Some(ext_client_id);
        }
        if let Some(time) = self.last_interaction_time {
            sub.last_interaction_time = Some(time);
        }
        if let Some(kind) = self.last_interaction_type {
            sub.last_interaction_type = Some(kind);
        }
        sub.config.extra.extend(self.extra);
    }
}
