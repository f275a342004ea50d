//! Durable (guaranteed-delivery) message store interface.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ClusterId, EndpointType, PubMessage};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Server last recorded as the delivery host of a sub_key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryServerRecord {
    pub cluster_id: ClusterId,
    pub server_name: String,
    pub endpoint_type: EndpointType,
}

/// A queued durable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub sub_key: String,
    #[serde(flatten)]
    pub message: PubMessage,
    #[serde(default)]
    pub delivery_count: u32,
}

/// Durable store consulted by the broker core.
///
/// Each method is a single atomic call; the core never reconciles
/// partial results.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Server recorded as the delivery host for a sub_key, if any.
    async fn get_delivery_server(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        is_wsx: bool,
    ) -> Result<Option<DeliveryServerRecord>>;

    /// Messages queued for any of `sub_keys`, published after `last_sql_run`
    /// and up to `pub_time_max`, skipping message IDs in `ignore_list`.
    async fn get_messages_by_sub_keys(
        &self,
        cluster_id: ClusterId,
        sub_keys: &[String],
        last_sql_run: f64,
        pub_time_max: f64,
        ignore_list: &HashSet<String>,
    ) -> Result<Vec<StoredMessage>>;

    /// IDs of all messages queued for a sub_key up to `pub_time_max`.
    async fn get_msg_ids_by_sub_key(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
    ) -> Result<Vec<String>>;

    /// Messages queued for a sub_key with the given IDs.
    async fn get_messages_by_msg_ids(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
        msg_ids: &[String],
    ) -> Result<Vec<StoredMessage>>;

    /// Mark messages as delivered.
    async fn confirm_delivered(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        now: f64,
    ) -> Result<()>;

    /// Mark messages for deletion.
    async fn set_to_delete(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        now: f64,
    ) -> Result<()>;
}
