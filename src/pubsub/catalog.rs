//! Locked access to topics, subscriptions and endpoints.
//!
//! Lookups return owned snapshots so the lock is never held by callers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::state::build_topic;
use super::{PubSub, Result};
use crate::model::{
    Endpoint, EndpointConfig, EndpointId, PubMessage, Subscription, SubscriptionUpdate, Topic,
    TopicConfig, TopicId,
};

impl PubSub {
    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Add a topic to the local catalog, resolving its hooks.
    pub async fn create_topic_object(&self, config: TopicConfig) {
        let topic = build_topic(config, self.invoker().as_ref(), self.server());
        info!(topic = %topic.name(), topic_id = topic.id(), has_gd = topic.has_gd(), "Creating topic object");
        self.lock().await.registry.create_topic(topic);
    }

    pub async fn edit_topic(&self, old_name: &str, config: TopicConfig) -> Result<()> {
        let topic = build_topic(config, self.invoker().as_ref(), self.server());
        info!(old_name = %old_name, new_name = %topic.name(), "Editing topic");
        self.lock().await.registry.edit_topic(old_name, topic)?;
        Ok(())
    }

    /// Delete a topic and everything hanging off it. Returns the
    /// subscriptions that were removed.
    pub async fn delete_topic(&self, topic_id: TopicId) -> Result<Vec<Subscription>> {
        let removed = self.lock().await.delete_topic(topic_id)?;
        info!(topic_id, subscriptions = removed.len(), "Deleted topic");
        Ok(removed)
    }

    pub async fn has_topic_by_name(&self, topic_name: &str) -> bool {
        self.lock().await.registry.has_topic_by_name(topic_name)
    }

    pub async fn has_topic_by_id(&self, topic_id: TopicId) -> bool {
        self.lock().await.registry.has_topic_by_id(topic_id)
    }

    pub async fn topic_id_by_name(&self, topic_name: &str) -> Result<TopicId> {
        Ok(self.lock().await.registry.topic_id_by_name(topic_name)?)
    }

    pub async fn topic_by_id(&self, topic_id: TopicId) -> Result<Topic> {
        Ok(self.lock().await.registry.topic_by_id(topic_id)?.clone())
    }

    pub async fn topic_by_name(&self, topic_name: &str) -> Result<Topic> {
        Ok(self.lock().await.registry.topic_by_name(topic_name)?.clone())
    }

    pub async fn topic_by_sub_key(&self, sub_key: &str) -> Result<Topic> {
        Ok(self.lock().await.registry.topic_by_sub_key(sub_key)?.clone())
    }

    pub async fn topics_by_sub_keys(&self, sub_keys: &[String]) -> Result<HashMap<String, Topic>> {
        let state = self.lock().await;
        let topics = state.registry.topics_by_sub_keys(sub_keys)?;
        Ok(topics
            .into_iter()
            .map(|(sub_key, topic)| (sub_key, topic.clone()))
            .collect())
    }

    pub async fn topic_name_by_sub_key(&self, sub_key: &str) -> Result<String> {
        Ok(self
            .lock()
            .await
            .registry
            .topic_name_by_sub_key(sub_key)?
            .to_string())
    }

    pub async fn sub_key_to_topic_name(&self, sub_keys: &[String]) -> HashMap<String, String> {
        self.lock().await.registry.sub_key_to_topic_name(sub_keys)
    }

    /// Number of distinct non-GD messages buffered for a topic.
    pub async fn non_gd_topic_depth(&self, topic_name: &str) -> Result<usize> {
        let state = self.lock().await;
        let topic_id = state.registry.topic_id_by_name(topic_name)?;
        Ok(state.backlog.topic_depth(topic_id))
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub async fn has_sub_key(&self, sub_key: &str) -> bool {
        self.lock().await.registry.has_sub_key(sub_key)
    }

    pub async fn subscription_by_sub_key(&self, sub_key: &str) -> Option<Subscription> {
        self.lock().await.registry.get_subscription(sub_key).cloned()
    }

    /// Subscribers of a topic, optionally only those with buffered messages.
    pub async fn subscriptions_by_topic(
        &self,
        topic_name: &str,
        require_backlog_messages: bool,
    ) -> Vec<Subscription> {
        self.lock()
            .await
            .subscriptions_by_topic(topic_name, require_backlog_messages)
    }

    pub async fn subscription_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Result<Subscription> {
        Ok(self
            .lock()
            .await
            .registry
            .subscription_by_endpoint_id(topic_name, endpoint_id)?
            .clone())
    }

    pub async fn subscription_by_id(&self, sub_id: i64) -> Option<Subscription> {
        self.lock().await.registry.subscription_by_id(sub_id).cloned()
    }

    pub async fn subscription_by_ext_client_id(&self, ext_client_id: &str) -> Option<Subscription> {
        self.lock()
            .await
            .registry
            .subscription_by_ext_client_id(ext_client_id)
            .cloned()
    }

    pub async fn edit_subscription(&self, sub_key: &str, update: SubscriptionUpdate) -> Result<()> {
        self.lock().await.registry.edit_subscription(sub_key, update)?;
        Ok(())
    }

    pub async fn sub_topics_for_endpoint(&self, endpoint_id: EndpointId) -> Vec<Topic> {
        self.lock()
            .await
            .registry
            .sub_topics_for_endpoint(endpoint_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn is_subscribed_to(&self, endpoint_id: EndpointId, topic_name: &str) -> bool {
        self.lock().await.registry.is_subscribed_to(endpoint_id, topic_name)
    }

    pub async fn len_subscribers(&self, topic_name: &str) -> usize {
        self.lock().await.registry.len_subscribers(topic_name)
    }

    pub async fn has_subscribers(&self, topic_name: &str) -> bool {
        self.lock().await.registry.has_subscribers(topic_name)
    }

    /// Buffered non-GD messages of a sub_key, oldest first, without removing them.
    pub async fn pending_messages(&self, topic_id: TopicId, sub_key: &str) -> Vec<Arc<PubMessage>> {
        self.lock().await.backlog.pending(topic_id, sub_key)
    }

    pub async fn format_subscriptions_by_sub_key(&self, title: &str) -> String {
        self.lock().await.registry.format_subscriptions_by_sub_key(title)
    }

    pub async fn format_subscriptions_by_topic(&self, title: &str) -> String {
        self.lock().await.registry.format_subscriptions_by_topic(title)
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    pub async fn create_endpoint(&self, config: EndpointConfig) {
        info!(endpoint = %config.name, endpoint_id = config.id, "Creating endpoint");
        self.lock().await.registry.create_endpoint(config);
    }

    pub async fn edit_endpoint(&self, config: EndpointConfig) {
        self.lock().await.registry.edit_endpoint(config);
    }

    pub async fn delete_endpoint(&self, endpoint_id: EndpointId) -> Option<Endpoint> {
        self.lock().await.registry.delete_endpoint(endpoint_id)
    }

    pub async fn endpoint_by_id(&self, endpoint_id: EndpointId) -> Result<Endpoint> {
        Ok(self.lock().await.registry.endpoint_by_id(endpoint_id)?.clone())
    }

    pub async fn endpoint_by_name(&self, name: &str) -> Result<Endpoint> {
        Ok(self.lock().await.registry.endpoint_by_name(name)?.clone())
    }

    pub async fn endpoint_by_ws_channel_id(&self, ws_channel_id: i64) -> Result<Endpoint> {
        Ok(self
            .lock()
            .await
            .registry
            .endpoint_by_ws_channel_id(ws_channel_id)?
            .clone())
    }

    pub async fn endpoint_id_by_sec_id(&self, security_id: i64) -> Result<EndpointId> {
        Ok(self.lock().await.registry.endpoint_id_by_sec_id(security_id)?)
    }

    pub async fn endpoint_id_by_ws_channel_id(&self, ws_channel_id: i64) -> Option<EndpointId> {
        self.lock()
            .await
            .registry
            .endpoint_id_by_ws_channel_id(ws_channel_id)
    }

    pub async fn endpoint_id_by_service_id(&self, service_id: i64) -> Result<EndpointId> {
        Ok(self.lock().await.registry.endpoint_id_by_service_id(service_id)?)
    }

    pub async fn is_allowed_pub_topic(
        &self,
        topic_name: &str,
        security_id: Option<i64>,
        ws_channel_id: Option<i64>,
    ) -> Option<String> {
        self.lock()
            .await
            .registry
            .is_allowed_pub_topic(topic_name, security_id, ws_channel_id)
    }

    pub async fn is_allowed_pub_topic_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Option<String> {
        self.lock()
            .await
            .registry
            .is_allowed_pub_topic_by_endpoint_id(topic_name, endpoint_id)
    }

    pub async fn is_allowed_sub_topic(
        &self,
        topic_name: &str,
        security_id: Option<i64>,
        ws_channel_id: Option<i64>,
    ) -> Option<String> {
        self.lock()
            .await
            .registry
            .is_allowed_sub_topic(topic_name, security_id, ws_channel_id)
    }

    pub async fn is_allowed_sub_topic_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Option<String> {
        self.lock()
            .await
            .registry
            .is_allowed_sub_topic_by_endpoint_id(topic_name, endpoint_id)
    }

    // ------------------------------------------------------------------
    // Publish counters
    // ------------------------------------------------------------------

    pub async fn incr_pub_counter(&self, endpoint_id: EndpointId) {
        self.lock().await.counters.incr(endpoint_id);
    }

    pub async fn pub_counter(&self) -> u64 {
        self.lock().await.counters.total()
    }

    /// Whether an endpoint's publish metadata should be written out now.
    pub async fn needs_endpoint_meta_update(&self, endpoint_id: EndpointId) -> bool {
        self.lock()
            .await
            .counters
            .needs_meta_update(endpoint_id, self.config().endpoint_meta_store_frequency)
    }
}
