//! Topic, subscription and endpoint registry.
//!
//! Plain `&mut self` data structure; the broker lock in
//! [`crate::pubsub::PubSub`] serializes all access. Subscriptions are stored
//! once, keyed by sub_key. The per-topic subscriber index holds sub_keys
//! only, so a mutation through either path is visible through the other.

use std::collections::HashMap;
use std::fmt::Write;

use tracing::{debug, info};

use crate::model::{
    Endpoint, EndpointConfig, EndpointId, Subscription, SubscriptionUpdate, Topic, TopicId,
};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Lookup failures. Cleanup paths usually treat these as "already gone".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No such topic: {0}")]
    TopicNotFound(String),

    #[error("No such topic ID: {0}")]
    TopicIdNotFound(TopicId),

    #[error("No such sub_key: {0}")]
    SubKeyNotFound(String),

    #[error("No such endpoint: {0}")]
    EndpointNotFound(String),

    #[error("No such endpoint ID: {0}")]
    EndpointIdNotFound(EndpointId),

    #[error("No subscription for endpoint {endpoint_id} to topic {topic_name}")]
    SubscriptionNotFound {
        endpoint_id: EndpointId,
        topic_name: String,
    },
}

/// In-memory catalog of topics, subscriptions and endpoints.
#[derive(Debug, Default)]
pub struct Registry {
    topics: HashMap<TopicId, Topic>,
    topic_name_to_id: HashMap<String, TopicId>,
    subscriptions_by_topic: HashMap<String, Vec<String>>,
    subscriptions_by_sub_key: HashMap<String, Subscription>,
    endpoints: HashMap<EndpointId, Endpoint>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Add a topic, replacing any topic with the same ID.
    ///
    /// A replaced topic with another name gives up that name; its
    /// subscribers move to the new one.
    pub fn create_topic(&mut self, topic: Topic) {
        info!(
            topic = %topic.name(),
            topic_id = topic.id(),
            server = %topic.server_name,
            pid = topic.server_pid,
            "Created topic object"
        );

        let previous_name = self
            .topics
            .get(&topic.id())
            .map(|previous| previous.name().to_string())
            .filter(|name| name != topic.name());
        if let Some(previous_name) = previous_name {
            self.rename_topic_index(&previous_name, topic.name(), topic.id());
        }

        self.topic_name_to_id
            .insert(topic.name().to_string(), topic.id());
        self.topics.insert(topic.id(), topic);
    }

    /// Remove a topic and return the subscriptions it held.
    ///
    /// Indices are dropped name first, then the subscriber list, then the
    /// ID, so an ID never resolves to a missing topic. The subscriptions
    /// are removed from the sub_key index last.
    pub fn delete_topic(&mut self, topic_id: TopicId) -> Result<Vec<Subscription>> {
        let topic_name = self.topic_by_id(topic_id)?.name().to_string();
        let sub_keys = self.detach_topic(topic_id, &topic_name);

        let removed: Vec<Subscription> = sub_keys
            .iter()
            .filter_map(|sub_key| self.subscriptions_by_sub_key.remove(sub_key))
            .collect();

        for sub in &removed {
            info!(sub_key = %sub.sub_key(), topic = %sub.topic_name(), "Deleted subscription object");
        }

        Ok(removed)
    }

    fn rename_topic_index(&mut self, old_name: &str, new_name: &str, topic_id: TopicId) {
        if self.topic_name_to_id.get(old_name) == Some(&topic_id) {
            self.topic_name_to_id.remove(old_name);
        }

        let sub_keys = self.subscriptions_by_topic.remove(old_name).unwrap_or_default();
        for sub_key in &sub_keys {
            if let Some(sub) = self.subscriptions_by_sub_key.get_mut(sub_key) {
                sub.config.topic_name = new_name.to_string();
            }
        }
        if !sub_keys.is_empty() {
            self.subscriptions_by_topic
                .entry(new_name.to_string())
                .or_default()
                .extend(sub_keys);
        }
        debug!(old_name = %old_name, new_name = %new_name, topic_id, "Topic replaced under a new name");
    }

    fn detach_topic(&mut self, topic_id: TopicId, topic_name: &str) -> Vec<String> {
        self.topic_name_to_id.remove(topic_name);
        let sub_keys = self
            .subscriptions_by_topic
            .remove(topic_name)
            .unwrap_or_default();
        self.topics.remove(&topic_id);

        info!(topic = %topic_name, topic_id, subs = ?sub_keys, "Deleted topic object");
        sub_keys
    }

    /// Replace a topic, possibly renaming it.
    ///
    /// Subscribers move to the new name and keep their subscriptions.
    /// Pending-sync flags and the durable high-water mark carry over.
    pub fn edit_topic(&mut self, old_name: &str, mut topic: Topic) -> Result<()> {
        let old_id = self.topic_id_by_name(old_name)?;
        if let Some(previous) = self.topics.get(&old_id) {
            topic.inherit_sync_state(previous);
        }

        let sub_keys = self.detach_topic(old_id, old_name);
        let new_name = topic.name().to_string();
        let new_id = topic.id();

        for sub_key in &sub_keys {
            if let Some(sub) = self.subscriptions_by_sub_key.get_mut(sub_key) {
                sub.config.topic_name = new_name.clone();
                sub.config.topic_id = new_id;
            }
        }

        self.create_topic(topic);
        if !sub_keys.is_empty() {
            self.subscriptions_by_topic.insert(new_name, sub_keys);
        }
        Ok(())
    }

    pub fn has_topic_by_name(&self, topic_name: &str) -> bool {
        self.topic_name_to_id.contains_key(topic_name)
    }

    pub fn has_topic_by_id(&self, topic_id: TopicId) -> bool {
        self.topics.contains_key(&topic_id)
    }

    pub fn topic_id_by_name(&self, topic_name: &str) -> Result<TopicId> {
        self.topic_name_to_id
            .get(topic_name)
            .copied()
            .ok_or_else(|| RegistryError::TopicNotFound(topic_name.to_string()))
    }

    pub fn topic_by_id(&self, topic_id: TopicId) -> Result<&Topic> {
        self.topics
            .get(&topic_id)
            .ok_or(RegistryError::TopicIdNotFound(topic_id))
    }

    pub fn topic_by_id_mut(&mut self, topic_id: TopicId) -> Result<&mut Topic> {
        self.topics
            .get_mut(&topic_id)
            .ok_or(RegistryError::TopicIdNotFound(topic_id))
    }

    pub fn topic_by_name(&self, topic_name: &str) -> Result<&Topic> {
        let topic_id = self.topic_id_by_name(topic_name)?;
        self.topic_by_id(topic_id)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    pub fn topics_mut(&mut self) -> impl Iterator<Item = &mut Topic> {
        self.topics.values_mut()
    }

    pub fn topic_ids(&self) -> Vec<TopicId> {
        self.topics.keys().copied().collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Add a subscription. Re-adding a known sub_key is a no-op and
    /// returns `false`.
    pub fn add_subscription(&mut self, sub: Subscription) -> Result<bool> {
        if self.has_sub_key(sub.sub_key()) {
            return Ok(false);
        }
        if !self.has_topic_by_name(sub.topic_name()) {
            return Err(RegistryError::TopicNotFound(sub.topic_name().to_string()));
        }

        info!(sub_key = %sub.sub_key(), topic = %sub.topic_name(), "Added subscription");

        self.subscriptions_by_topic
            .entry(sub.topic_name().to_string())
            .or_default()
            .push(sub.sub_key().to_string());
        self.subscriptions_by_sub_key
            .insert(sub.sub_key().to_string(), sub);
        Ok(true)
    }

    /// Remove a subscription from both indices.
    pub fn remove_subscription(&mut self, sub_key: &str) -> Option<Subscription> {
        let sub = self.subscriptions_by_sub_key.remove(sub_key)?;

        if let Some(sub_keys) = self.subscriptions_by_topic.get_mut(sub.topic_name()) {
            sub_keys.retain(|sk| sk != sub_key);
            if sub_keys.is_empty() {
                self.subscriptions_by_topic.remove(sub.topic_name());
            }
        }

        info!(sub_key = %sub_key, topic = %sub.topic_name(), "Deleted subscription object");
        Some(sub)
    }

    pub fn edit_subscription(&mut self, sub_key: &str, update: SubscriptionUpdate) -> Result<()> {
        let sub = self
            .subscriptions_by_sub_key
            .get_mut(sub_key)
            .ok_or_else(|| RegistryError::SubKeyNotFound(sub_key.to_string()))?;
        update.apply(sub);
        Ok(())
    }

    pub fn has_sub_key(&self, sub_key: &str) -> bool {
        self.subscriptions_by_sub_key.contains_key(sub_key)
    }

    pub fn subscription(&self, sub_key: &str) -> Result<&Subscription> {
        self.subscriptions_by_sub_key
            .get(sub_key)
            .ok_or_else(|| RegistryError::SubKeyNotFound(sub_key.to_string()))
    }

    pub fn get_subscription(&self, sub_key: &str) -> Option<&Subscription> {
        self.subscriptions_by_sub_key.get(sub_key)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions_by_sub_key.values()
    }

    /// Subscribers of a topic in subscription order.
    pub fn subscriptions_by_topic(&self, topic_name: &str) -> Vec<&Subscription> {
        self.subscriptions_by_topic
            .get(topic_name)
            .map(|sub_keys| {
                sub_keys
                    .iter()
                    .filter_map(|sk| self.subscriptions_by_sub_key.get(sk))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sub keys subscribed to a topic.
    pub fn sub_keys_by_topic(&self, topic_name: &str) -> &[String] {
        self.subscriptions_by_topic
            .get(topic_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn subscription_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Result<&Subscription> {
        self.subscriptions()
            .find(|sub| sub.topic_name() == topic_name && sub.endpoint_id() == endpoint_id)
            .ok_or_else(|| RegistryError::SubscriptionNotFound {
                endpoint_id,
                topic_name: topic_name.to_string(),
            })
    }

    pub fn subscription_by_id(&self, sub_id: i64) -> Option<&Subscription> {
        self.subscriptions().find(|sub| sub.config.id == sub_id)
    }

    pub fn subscription_by_ext_client_id(&self, ext_client_id: &str) -> Option<&Subscription> {
        self.subscriptions()
            .find(|sub| sub.config.ext_client_id.as_deref() == Some(ext_client_id))
    }

    pub fn len_subscribers(&self, topic_name: &str) -> usize {
        self.sub_keys_by_topic(topic_name).len()
    }

    pub fn has_subscribers(&self, topic_name: &str) -> bool {
        self.len_subscribers(topic_name) > 0
    }

    pub fn topic_name_by_sub_key(&self, sub_key: &str) -> Result<&str> {
        self.subscription(sub_key).map(Subscription::topic_name)
    }

    /// Topic name of each known sub_key; unknown ones are skipped.
    pub fn sub_key_to_topic_name(&self, sub_keys: &[String]) -> HashMap<String, String> {
        sub_keys
            .iter()
            .filter_map(|sk| {
                self.get_subscription(sk)
                    .map(|sub| (sk.clone(), sub.topic_name().to_string()))
            })
            .collect()
    }

    pub fn topic_by_sub_key(&self, sub_key: &str) -> Result<&Topic> {
        let topic_name = self.topic_name_by_sub_key(sub_key)?;
        self.topic_by_name(topic_name)
    }

    pub fn topics_by_sub_keys(&self, sub_keys: &[String]) -> Result<HashMap<String, &Topic>> {
        sub_keys
            .iter()
            .map(|sk| self.topic_by_sub_key(sk).map(|topic| (sk.clone(), topic)))
            .collect()
    }

    /// Topics an endpoint is subscribed to.
    pub fn sub_topics_for_endpoint(&self, endpoint_id: EndpointId) -> Vec<&Topic> {
        let mut topics: Vec<&Topic> = self
            .subscriptions()
            .filter(|sub| sub.endpoint_id() == endpoint_id)
            .filter_map(|sub| self.topic_by_name(sub.topic_name()).ok())
            .collect();
        topics.sort_by_key(|topic| topic.id());
        topics.dedup_by_key(|topic| topic.id());
        topics
    }

    pub fn is_subscribed_to(&self, endpoint_id: EndpointId, topic_name: &str) -> bool {
        self.subscriptions_by_topic(topic_name)
            .iter()
            .any(|sub| sub.endpoint_id() == endpoint_id)
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    pub fn create_endpoint(&mut self, config: EndpointConfig) {
        info!(endpoint = %config.name, endpoint_id = config.id, "Created endpoint");
        self.endpoints.insert(config.id, Endpoint::new(config));
    }

    pub fn edit_endpoint(&mut self, config: EndpointConfig) {
        self.endpoints.insert(config.id, Endpoint::new(config));
    }

    pub fn delete_endpoint(&mut self, endpoint_id: EndpointId) -> Option<Endpoint> {
        let endpoint = self.endpoints.remove(&endpoint_id)?;
        info!(endpoint = %endpoint.name(), endpoint_id, "Deleted endpoint");
        Some(endpoint)
    }

    pub fn endpoint_by_id(&self, endpoint_id: EndpointId) -> Result<&Endpoint> {
        self.endpoints
            .get(&endpoint_id)
            .ok_or(RegistryError::EndpointIdNotFound(endpoint_id))
    }

    pub fn endpoint_by_name(&self, name: &str) -> Result<&Endpoint> {
        self.endpoints
            .values()
            .find(|ep| ep.name() == name)
            .ok_or_else(|| RegistryError::EndpointNotFound(name.to_string()))
    }

    pub fn endpoint_by_ws_channel_id(&self, ws_channel_id: i64) -> Result<&Endpoint> {
        self.endpoints
            .values()
            .find(|ep| ep.config.ws_channel_id == Some(ws_channel_id))
            .ok_or_else(|| RegistryError::EndpointNotFound(format!("ws_channel_id={ws_channel_id}")))
    }

    pub fn endpoint_id_by_sec_id(&self, security_id: i64) -> Result<EndpointId> {
        self.endpoints
            .values()
            .find(|ep| ep.config.security_id == Some(security_id))
            .map(Endpoint::id)
            .ok_or_else(|| RegistryError::EndpointNotFound(format!("security_id={security_id}")))
    }

    pub fn endpoint_id_by_ws_channel_id(&self, ws_channel_id: i64) -> Option<EndpointId> {
        self.endpoint_by_ws_channel_id(ws_channel_id)
            .ok()
            .map(Endpoint::id)
    }

    pub fn endpoint_id_by_service_id(&self, service_id: i64) -> Result<EndpointId> {
        self.endpoints
            .values()
            .find(|ep| ep.config.service_id == Some(service_id))
            .map(Endpoint::id)
            .ok_or_else(|| RegistryError::EndpointNotFound(format!("service_id={service_id}")))
    }

    fn endpoint_by_identity(&self, security_id: Option<i64>, ws_channel_id: Option<i64>) -> Option<&Endpoint> {
        if let Some(sec_id) = security_id {
            return self
                .endpoint_id_by_sec_id(sec_id)
                .ok()
                .and_then(|id| self.endpoints.get(&id));
        }
        ws_channel_id.and_then(|id| self.endpoint_by_ws_channel_id(id).ok())
    }

    /// Publish pattern matching `topic_name` for the endpoint identified by
    /// a security definition or websocket channel.
    pub fn is_allowed_pub_topic(
        &self,
        topic_name: &str,
        security_id: Option<i64>,
        ws_channel_id: Option<i64>,
    ) -> Option<String> {
        self.endpoint_by_identity(security_id, ws_channel_id)
            .and_then(|ep| ep.pub_pattern_for(topic_name))
            .map(str::to_string)
    }

    pub fn is_allowed_pub_topic_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Option<String> {
        self.endpoints
            .get(&endpoint_id)
            .and_then(|ep| ep.pub_pattern_for(topic_name))
            .map(str::to_string)
    }

    pub fn is_allowed_sub_topic(
        &self,
        topic_name: &str,
        security_id: Option<i64>,
        ws_channel_id: Option<i64>,
    ) -> Option<String> {
        self.endpoint_by_identity(security_id, ws_channel_id)
            .and_then(|ep| ep.sub_pattern_for(topic_name))
            .map(str::to_string)
    }

    pub fn is_allowed_sub_topic_by_endpoint_id(
        &self,
        topic_name: &str,
        endpoint_id: EndpointId,
    ) -> Option<String> {
        self.endpoints
            .get(&endpoint_id)
            .and_then(|ep| ep.sub_pattern_for(topic_name))
            .map(str::to_string)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Dump of all subscriptions keyed by sub_key.
    pub fn format_subscriptions_by_sub_key(&self, title: &str) -> String {
        let mut sub_keys: Vec<&String> = self.subscriptions_by_sub_key.keys().collect();
        sub_keys.sort();

        let mut out = format!("{title}\n");
        for sub_key in sub_keys {
            if let Some(sub) = self.subscriptions_by_sub_key.get(sub_key) {
                write_sub(&mut out, sub);
            }
        }
        out
    }

    /// Dump of all subscriptions grouped by topic name.
    pub fn format_subscriptions_by_topic(&self, title: &str) -> String {
        let mut topic_names: Vec<&String> = self.subscriptions_by_topic.keys().collect();
        topic_names.sort();

        let mut out = format!("{title}\n");
        for topic_name in topic_names {
            let _ = writeln!(out, "{topic_name}:");
            for sub in self.subscriptions_by_topic(topic_name) {
                write_sub(&mut out, sub);
            }
        }
        out
    }
}

fn write_sub(out: &mut String, sub: &Subscription) {
    let _ = writeln!(
        out,
        "  {} -> {} (endpoint:{} type:{} ext_client_id:{})",
        sub.sub_key(),
        sub.topic_name(),
        sub.endpoint_id(),
        sub.endpoint_type(),
        sub.config.ext_client_id.as_deref().unwrap_or("-"),
    );
}

#[cfg(test)]
mod tests;
