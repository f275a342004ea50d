//! Delivery ownership: local records, recovery and announcements.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{names, PubSub, Result};
use crate::interfaces::BrokerMessage;
use crate::model::{
    DeliveryOwner, DeliveryOwnerConfig, EndpointType, Subscription, SubscriptionConfig,
};
use crate::router::{TaskServers, DEFAULT_SUB_PATTERN_MATCHED};

impl PubSub {
    /// Owner record of a sub_key, local lookup only.
    pub async fn get_delivery_server_by_sub_key(&self, sub_key: &str) -> Option<DeliveryOwner> {
        self.lock().await.router.get(sub_key).cloned()
    }

    pub async fn set_sub_key_server(&self, config: DeliveryOwnerConfig) -> Result<()> {
        self.lock().await.set_owner(config)?;
        Ok(())
    }

    pub async fn delete_sub_key_server(
        &self,
        sub_key: &str,
        sub_pattern_matched: Option<&str>,
    ) -> Option<DeliveryOwner> {
        self.lock().await.remove_owner(sub_key, sub_pattern_matched)
    }

    /// Forget the owners of a disconnected websocket client's sub_keys.
    pub async fn remove_ws_sub_key_server(&self, sub_key_list: &[String]) -> usize {
        let removed = self.lock().await.router.remove_many(sub_key_list);
        info!(removed, requested = sub_key_list.len(), "Removed websocket delivery owners");
        removed
    }

    /// Human-readable table of all owner records, newest first.
    pub async fn format_delivery_owners(&self) -> String {
        self.lock().await.format_owners(DEFAULT_SUB_PATTERN_MATCHED)
    }

    /// Ask a server which of its processes delivers messages for a sub_key.
    ///
    /// Bounded by the RPC timeout. Any failure or a non-positive answer
    /// yields `None`.
    pub async fn get_server_pid_for_sub_key(&self, server_name: &str, sub_key: &str) -> Option<u32> {
        let call = self.collaborators.remote.invoke_server(
            server_name,
            names::GET_SERVER_PID_FOR_SUB_KEY,
            json!({ "sub_key": sub_key }),
        );

        match tokio::time::timeout(self.config().rpc_timeout(), call).await {
            Ok(Ok(response)) => response
                .get("server_pid")
                .and_then(Value::as_u64)
                .and_then(|pid| u32::try_from(pid).ok())
                .filter(|pid| *pid > 0),
            Ok(Err(e)) => {
                warn!(server = %server_name, sub_key = %sub_key, error = %e, "Could not get server pid for sub_key");
                None
            }
            Err(_) => {
                warn!(
                    server = %server_name,
                    sub_key = %sub_key,
                    timeout_ms = self.config().rpc_timeout_ms,
                    "Timed out getting server pid for sub_key"
                );
                None
            }
        }
    }

    /// Rebuild a missing owner record.
    ///
    /// The durable store names the server that last hosted the sub_key's
    /// delivery task; that server is then asked which process runs it. Only
    /// a positive pid from the second call creates a record.
    pub async fn add_missing_server_for_sub_key(
        &self,
        sub_key: &str,
        is_wsx: bool,
    ) -> Option<DeliveryOwner> {
        let cluster_id = self.server().cluster_id;

        let record = match self.store().get_delivery_server(cluster_id, sub_key, is_wsx).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let should_log = if is_wsx {
                    self.config().log_if_wsx_deliv_server_not_found
                } else {
                    self.config().log_if_deliv_server_not_found
                };
                if should_log {
                    info!(sub_key = %sub_key, is_wsx, "No delivery server recorded for sub_key");
                }
                return None;
            }
            Err(e) => {
                warn!(sub_key = %sub_key, error = %e, "Could not look up delivery server");
                return None;
            }
        };

        let Some(server_pid) = self
            .get_server_pid_for_sub_key(&record.server_name, sub_key)
            .await
        else {
            info!(sub_key = %sub_key, server = %record.server_name, "Delivery server has no process for sub_key");
            return None;
        };

        let config = DeliveryOwnerConfig {
            sub_key: sub_key.to_string(),
            cluster_id: record.cluster_id,
            server_name: record.server_name,
            server_pid,
            endpoint_type: record.endpoint_type,
            channel_name: None,
            pub_client_id: None,
            wsx_info: None,
        };

        let mut state = self.lock().await;
        if !state.registry.has_sub_key(sub_key) {
            debug!(sub_key = %sub_key, "Subscription removed during owner recovery");
            return None;
        }
        if let Some(existing) = state.router.get(sub_key).filter(|owner| owner.server_pid > 0) {
            return Some(existing.clone());
        }
        if let Err(e) = state.set_owner(config) {
            warn!(sub_key = %sub_key, error = %e, "Could not record recovered delivery owner");
            return None;
        }
        state.router.get(sub_key).cloned()
    }

    /// Owner of a sub_key, recovering it if there is no local record.
    pub async fn resolve_owner(&self, sub_key: &str, is_wsx: bool) -> Option<DeliveryOwner> {
        if let Some(owner) = self
            .get_delivery_server_by_sub_key(sub_key)
            .await
            .filter(|owner| owner.server_pid > 0)
        {
            return Some(owner);
        }
        self.add_missing_server_for_sub_key(sub_key, is_wsx).await
    }

    /// Group sub_keys by the process delivering them, recovering missing
    /// owners first. Sub keys still without an owner are returned apart.
    pub async fn get_task_servers_by_sub_keys(&self, sub_keys: &[(String, bool)]) -> TaskServers {
        let missing: Vec<(String, bool)> = {
            let state = self.lock().await;
            sub_keys
                .iter()
                .filter(|(sub_key, _)| {
                    !state
                        .router
                        .get(sub_key)
                        .is_some_and(|owner| owner.server_pid > 0)
                })
                .cloned()
                .collect()
        };

        for (sub_key, is_wsx) in &missing {
            self.add_missing_server_for_sub_key(sub_key, *is_wsx).await;
        }

        self.lock()
            .await
            .router
            .group_by_server(sub_keys.iter().map(|(sub_key, _)| sub_key.as_str()))
    }

    /// Record this process as the owner of a service subscription and
    /// tell the other processes.
    pub async fn set_config_for_service_subscription(&self, sub_key: &str) -> Result<()> {
        let config = self.local_owner_config(sub_key, EndpointType::Service);
        self.lock().await.set_owner(config.clone())?;
        self.announce_owner(config).await
    }

    /// Broadcast that a process now owns delivery for a sub_key.
    pub async fn announce_owner(&self, config: DeliveryOwnerConfig) -> Result<()> {
        debug!(sub_key = %config.sub_key, server = %config.server_name, pid = config.server_pid, "Announcing delivery owner");
        self.collaborators
            .broker
            .publish(BrokerMessage::SubKeyServerSet(config))
            .await?;
        Ok(())
    }

    /// Add a subscription to the local catalog.
    ///
    /// Idempotent per sub_key; returns whether it was added. When the
    /// subscription is pinned to this server and is not a websocket one,
    /// this process becomes its delivery owner and its delivery task is
    /// created.
    pub async fn create_subscription_object(&self, config: SubscriptionConfig) -> Result<bool> {
        let server = self.server();
        let owned_here = config.endpoint_type != EndpointType::WebSockets
            && config.cluster_id == server.cluster_id
            && config.server_id == Some(server.server_id);
        let owner = owned_here.then(|| self.local_owner_config(&config.sub_key, config.endpoint_type));

        let added = {
            let mut state = self.lock().await;
            let added = state.registry.add_subscription(Subscription::new(config.clone()))?;
            if let (true, Some(owner)) = (added, owner.clone()) {
                state.set_owner(owner)?;
            }
            added
        };

        if !added {
            debug!(sub_key = %config.sub_key, "Subscription already exists");
            return Ok(false);
        }
        info!(sub_key = %config.sub_key, topic = %config.topic_name, owned_here, "Created subscription object");

        if let Some(owner) = owner {
            self.invoker()
                .invoke(names::CREATE_DELIVERY_TASK, serde_json::to_value(&config)?)
                .await?;
            self.announce_owner(owner).await?;
        }
        Ok(true)
    }

    /// Add a subscription and run the topic's on-subscribed hook.
    pub async fn add_subscription(&self, config: SubscriptionConfig) -> Result<bool> {
        let sub_key = config.sub_key.clone();
        let topic_name = config.topic_name.clone();
        if !self.create_subscription_object(config).await? {
            return Ok(false);
        }

        let snapshot = {
            let state = self.lock().await;
            let topic = state.registry.topic_by_name(&topic_name)?;
            let sub = state.registry.subscription(&sub_key)?;
            topic
                .hooks
                .on_subscribed
                .clone()
                .map(|hook| (hook, super::topic_context(topic), sub.clone()))
        };

        if let Some((hook, topic, sub)) = snapshot {
            self.invoke_subscription_hook(&hook, &topic, &sub).await?;
        }
        Ok(true)
    }

    fn local_owner_config(&self, sub_key: &str, endpoint_type: EndpointType) -> DeliveryOwnerConfig {
        let server = self.server();
        DeliveryOwnerConfig {
            sub_key: sub_key.to_string(),
            cluster_id: server.cluster_id,
            server_name: server.server_name.clone(),
            server_pid: server.server_pid,
            endpoint_type,
            channel_name: None,
            pub_client_id: None,
            wsx_info: None,
        }
    }
}
