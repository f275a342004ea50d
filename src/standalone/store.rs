//! In-memory durable store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::interfaces::durable_store::Result;
use crate::interfaces::{DeliveryServerRecord, DurableStore, StoredMessage};
use crate::model::{ClusterId, PubMessage};

type SubKeyId = (ClusterId, String);

#[derive(Debug, Clone)]
struct StoredEntry {
    message: StoredMessage,
    delivered: bool,
    deleted: bool,
}

impl StoredEntry {
    fn is_pending(&self) -> bool {
        !self.delivered && !self.deleted
    }
}

/// Durable store kept in process memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    delivery_servers: RwLock<HashMap<SubKeyId, DeliveryServerRecord>>,
    queues: RwLock<HashMap<SubKeyId, Vec<StoredEntry>>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the server hosting a sub_key's delivery task.
    pub async fn set_delivery_server(&self, sub_key: &str, record: DeliveryServerRecord) {
        self.delivery_servers
            .write()
            .await
            .insert((record.cluster_id, sub_key.to_string()), record);
    }

    /// Queue a GD message for a subscriber.
    pub async fn enqueue(&self, cluster_id: ClusterId, sub_key: &str, message: PubMessage) {
        debug!(sub_key = %sub_key, msg_id = %message.pub_msg_id, "Queued GD message");
        self.queues
            .write()
            .await
            .entry((cluster_id, sub_key.to_string()))
            .or_default()
            .push(StoredEntry {
                message: StoredMessage {
                    sub_key: sub_key.to_string(),
                    message,
                    delivery_count: 0,
                },
                delivered: false,
                deleted: false,
            });
    }

    /// Number of messages neither delivered nor deleted.
    pub async fn depth(&self, cluster_id: ClusterId, sub_key: &str) -> usize {
        self.queues
            .read()
            .await
            .get(&(cluster_id, sub_key.to_string()))
            .map(|entries| entries.iter().filter(|entry| entry.is_pending()).count())
            .unwrap_or(0)
    }

    /// Drop everything queued for a sub_key.
    pub async fn remove_sub_key(&self, cluster_id: ClusterId, sub_key: &str) {
        let key = (cluster_id, sub_key.to_string());
        self.queues.write().await.remove(&key);
        self.delivery_servers.write().await.remove(&key);
    }

    async fn pending_where(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        keep: impl Fn(&StoredMessage) -> bool,
    ) -> Vec<StoredMessage> {
        self.queues
            .read()
            .await
            .get(&(cluster_id, sub_key.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.is_pending() && keep(&entry.message))
                    .map(|entry| entry.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn mark(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        apply: impl Fn(&mut StoredEntry),
    ) {
        let mut queues = self.queues.write().await;
        if let Some(entries) = queues.get_mut(&(cluster_id, sub_key.to_string())) {
            for entry in entries
                .iter_mut()
                .filter(|entry| msg_ids.contains(&entry.message.message.pub_msg_id))
            {
                apply(entry);
            }
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get_delivery_server(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        _is_wsx: bool,
    ) -> Result<Option<DeliveryServerRecord>> {
        Ok(self
            .delivery_servers
            .read()
            .await
            .get(&(cluster_id, sub_key.to_string()))
            .cloned())
    }

    async fn get_messages_by_sub_keys(
        &self,
        cluster_id: ClusterId,
        sub_keys: &[String],
        last_sql_run: f64,
        pub_time_max: f64,
        ignore_list: &HashSet<String>,
    ) -> Result<Vec<StoredMessage>> {
        let mut messages = Vec::new();
        for sub_key in sub_keys {
            messages.extend(
                self.pending_where(cluster_id, sub_key, |stored| {
                    stored.message.pub_time > last_sql_run
                        && stored.message.pub_time <= pub_time_max
                        && !ignore_list.contains(&stored.message.pub_msg_id)
                })
                .await,
            );
        }
        messages.sort_by(|a, b| a.message.pub_time.total_cmp(&b.message.pub_time));
        Ok(messages)
    }

    async fn get_msg_ids_by_sub_key(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
    ) -> Result<Vec<String>> {
        Ok(self
            .pending_where(cluster_id, sub_key, |stored| {
                stored.message.pub_time <= pub_time_max
            })
            .await
            .into_iter()
            .map(|stored| stored.message.pub_msg_id)
            .collect())
    }

    async fn get_messages_by_msg_ids(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
        msg_ids: &[String],
    ) -> Result<Vec<StoredMessage>> {
        Ok(self
            .pending_where(cluster_id, sub_key, |stored| {
                stored.message.pub_time <= pub_time_max
                    && msg_ids.contains(&stored.message.pub_msg_id)
            })
            .await)
    }

    async fn confirm_delivered(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        _now: f64,
    ) -> Result<()> {
        self.mark(cluster_id, sub_key, msg_ids, |entry| {
            entry.delivered = true;
            entry.message.delivery_count += 1;
        })
        .await;
        Ok(())
    }

    async fn set_to_delete(
        &self,
        cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        _now: f64,
    ) -> Result<()> {
        self.mark(cluster_id, sub_key, msg_ids, |entry| entry.deleted = true)
            .await;
        Ok(())
    }
}
