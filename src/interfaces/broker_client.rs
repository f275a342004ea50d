//! Inter-process broker channel.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::service_invoker::Result;
use crate::model::{
    DeliveryOwnerConfig, EndpointConfig, EndpointId, SubscriptionConfig, SubscriptionUpdate,
    TopicConfig, TopicId,
};

/// Structured notification broadcast to every broker process in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// A process now owns delivery for a sub_key.
    SubKeyServerSet(DeliveryOwnerConfig),
    /// A websocket client disconnected; its sub_keys have no owner.
    WsxSubKeyServerRemove { sub_key_list: Vec<String> },
    SubscriptionCreate(SubscriptionConfig),
    SubscriptionEdit {
        sub_key: String,
        update: SubscriptionUpdate,
    },
    /// Sub keys to unsubscribe, keyed by topic name.
    SubscriptionDelete {
        topic_sub_keys: HashMap<String, Vec<String>>,
    },
    TopicCreate(TopicConfig),
    TopicEdit {
        old_name: String,
        config: TopicConfig,
    },
    TopicDelete { id: TopicId },
    EndpointCreate(EndpointConfig),
    EndpointEdit(EndpointConfig),
    EndpointDelete { id: EndpointId },
    /// New service code was deployed.
    HotDeployCreateService { services_deployed: Vec<i64> },
}

impl BrokerMessage {
    /// Action name used in logs.
    pub fn action(&self) -> &'static str {
        match self {
            BrokerMessage::SubKeyServerSet(_) => "sub_key_server_set",
            BrokerMessage::WsxSubKeyServerRemove { .. } => "wsx_sub_key_server_remove",
            BrokerMessage::SubscriptionCreate(_) => "subscription_create",
            BrokerMessage::SubscriptionEdit { .. } => "subscription_edit",
            BrokerMessage::SubscriptionDelete { .. } => "subscription_delete",
            BrokerMessage::TopicCreate(_) => "topic_create",
            BrokerMessage::TopicEdit { .. } => "topic_edit",
            BrokerMessage::TopicDelete { .. } => "topic_delete",
            BrokerMessage::EndpointCreate(_) => "endpoint_create",
            BrokerMessage::EndpointEdit(_) => "endpoint_edit",
            BrokerMessage::EndpointDelete { .. } => "endpoint_delete",
            BrokerMessage::HotDeployCreateService { .. } => "hot_deploy_create_service",
        }
    }
}

/// Broadcasts broker messages to all processes.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, msg: BrokerMessage) -> Result<()>;
}
