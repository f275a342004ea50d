//! Broker state guarded by the façade's lock.
//!
//! Every method here assumes the caller holds the lock; none of them
//! performs I/O or acquires a lock of its own.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::hooks::topic_context;
use crate::backlog::{BacklogLimits, InRamBacklog, OverflowSink};
use crate::config::ServerIdentity;
use crate::hooks::{HookBindings, HookInvoker};
use crate::interfaces::ServiceInvoker;
use crate::model::{
    DeliveryOwner, DeliveryOwnerConfig, EndpointId, EndpointType, PubMessage, Subscription,
    Topic, TopicConfig, TopicId,
};
use crate::registry::{Registry, Result as RegistryResult};
use crate::router::{format_owner_table, DeliveryRouter, DEFAULT_SUB_PATTERN_MATCHED};

/// A subscription removed by unsubscribe, with what is needed to finish
/// the cleanup once the lock is released.
#[derive(Debug)]
pub(crate) struct Unsubscribed {
    pub sub: Subscription,
    pub topic: Value,
    /// This process ran the subscription's delivery task.
    pub owned_locally: bool,
    pub on_unsubscribed: Option<HookInvoker>,
}

/// Publish counters, overall and per endpoint.
#[derive(Debug, Default)]
pub(crate) struct PublishCounters {
    total: u64,
    by_endpoint: HashMap<EndpointId, u64>,
}

impl PublishCounters {
    /// The first publish of an endpoint counts as zero.
    pub fn incr(&mut self, endpoint_id: EndpointId) {
        self.total += 1;
        self.by_endpoint
            .entry(endpoint_id)
            .and_modify(|count| *count += 1)
            .or_insert(0);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn needs_meta_update(&self, endpoint_id: EndpointId, frequency: u64) -> bool {
        frequency > 0
            && self
                .by_endpoint
                .get(&endpoint_id)
                .is_some_and(|count| count % frequency == 0)
    }
}

/// Build a topic object, resolving its hook invokers.
pub(crate) fn build_topic(
    mut config: TopicConfig,
    invoker: &dyn ServiceInvoker,
    server: &ServerIdentity,
) -> Topic {
    if config.hook_service_name.is_none() {
        if let Some(service_id) = config.hook_service_id {
            config.hook_service_name = invoker.service_name_by_id(service_id);
        }
    }
    let hooks = HookBindings::resolve(config.hook_service_name.as_deref(), invoker);
    Topic::new(config, hooks, &server.server_name, server.server_pid)
}

/// Registry, backlog and delivery router of one broker instance.
#[derive(Debug)]
pub(crate) struct BrokerState {
    pub registry: Registry,
    pub backlog: InRamBacklog,
    pub router: DeliveryRouter,
    pub counters: PublishCounters,
    owner_table_columns: [usize; 6],
}

impl BrokerState {
    pub fn new(overflow: Arc<dyn OverflowSink>, owner_table_columns: [usize; 6]) -> Self {
        Self {
            registry: Registry::new(),
            backlog: InRamBacklog::new(overflow),
            router: DeliveryRouter::new(),
            counters: PublishCounters::default(),
            owner_table_columns,
        }
    }

    /// Delete a topic together with its subscriptions, owners and backlog.
    pub fn delete_topic(&mut self, topic_id: TopicId) -> RegistryResult<Vec<Subscription>> {
        let removed = self.registry.delete_topic(topic_id)?;
        for sub in &removed {
            self.remove_owner(sub.sub_key(), sub.sub_pattern_matched());
        }
        self.backlog.drop_topic(topic_id);
        Ok(removed)
    }

    /// Remove a subscription, then its owner record.
    ///
    /// The subscription goes first; the owner table logged on removal
    /// falls back to the pattern given here for sub_keys already gone.
    pub fn delete_subscription(
        &mut self,
        sub_key: &str,
    ) -> Option<(Subscription, Option<DeliveryOwner>)> {
        let Some(sub) = self.registry.remove_subscription(sub_key) else {
            info!(sub_key = %sub_key, "Could not find sub_key to delete");
            return None;
        };
        let owner = self.remove_owner(sub_key, sub.sub_pattern_matched());
        Some((sub, owner))
    }

    pub fn remove_owner(
        &mut self,
        sub_key: &str,
        sub_pattern_matched: Option<&str>,
    ) -> Option<DeliveryOwner> {
        let Some(owner) = self.router.remove(sub_key) else {
            debug!(sub_key = %sub_key, "No delivery owner to delete");
            return None;
        };

        info!(
            sub_key = %sub_key,
            server = %owner.server_name,
            pid = owner.server_pid,
            "Deleted delivery owner"
        );
        let table = self.format_owners(sub_pattern_matched.unwrap_or(DEFAULT_SUB_PATTERN_MATCHED));
        info!("Current delivery owners after deletion of {sub_key}:\n{table}");
        Some(owner)
    }

    /// Unsubscribe sub_keys, grouped by topic name.
    ///
    /// All topic names are resolved before anything is removed.
    pub fn unsubscribe(
        &mut self,
        topic_sub_keys: &HashMap<String, Vec<String>>,
        server: &ServerIdentity,
    ) -> RegistryResult<Vec<Unsubscribed>> {
        let resolved = topic_sub_keys
            .iter()
            .map(|(topic_name, sub_keys)| {
                self.registry.topic_by_name(topic_name).map(|topic| {
                    (
                        topic.id(),
                        topic_context(topic),
                        topic.hooks.on_unsubscribed.clone(),
                        topic_name.as_str(),
                        sub_keys,
                    )
                })
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        let mut out = Vec::new();
        for (topic_id, topic, hook, topic_name, sub_keys) in resolved {
            self.backlog.unsubscribe(topic_id, topic_name, sub_keys);

            for sub_key in sub_keys {
                let owned_locally = self.router.get(sub_key).is_some_and(|owner| {
                    owner.is_process(server.cluster_id, &server.server_name, server.server_pid)
                });

                match self.delete_subscription(sub_key) {
                    Some((sub, _)) => out.push(Unsubscribed {
                        sub,
                        topic: topic.clone(),
                        owned_locally,
                        on_unsubscribed: hook.clone(),
                    }),
                    None => {
                        self.remove_owner(sub_key, None);
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn subscriptions_by_topic(
        &self,
        topic_name: &str,
        require_backlog_messages: bool,
    ) -> Vec<Subscription> {
        self.registry
            .subscriptions_by_topic(topic_name)
            .into_iter()
            .filter(|sub| {
                !require_backlog_messages || self.backlog.has_messages_by_sub_key(sub.sub_key())
            })
            .cloned()
            .collect()
    }

    /// Set or clear a topic's pending-sync flag. Setting the GD flag also
    /// raises the durable high-water mark.
    pub fn set_sync_has_msg(
        &mut self,
        topic_id: TopicId,
        is_gd: bool,
        value: bool,
        gd_pub_time_max: f64,
    ) -> RegistryResult<()> {
        let topic = self.registry.topic_by_id_mut(topic_id)?;
        if is_gd {
            topic.sync_has_gd_msg = value;
            topic.raise_gd_pub_time_max(gd_pub_time_max);
        } else {
            topic.sync_has_non_gd_msg = value;
        }
        Ok(())
    }

    /// Queue non-GD messages and flag the topic for the next sync pass.
    pub fn store_in_ram(
        &mut self,
        cid: &str,
        topic_id: TopicId,
        sub_keys: &[String],
        messages: Vec<PubMessage>,
    ) -> RegistryResult<()> {
        let topic = self.registry.topic_by_id(topic_id)?;
        let limits = BacklogLimits {
            max_depth: topic.max_depth_non_gd(),
            use_overflow_log: topic.config.use_overflow_log,
        };
        let topic_name = topic.name().to_string();

        self.backlog
            .add_messages(cid, topic_id, &topic_name, limits, sub_keys, messages);
        self.set_sync_has_msg(topic_id, false, true, 0.0)
    }

    /// Re-arm a topic after its delivery tasks could not be notified.
    ///
    /// The higher of the given and the tracked high-water mark wins.
    pub fn after_gd_sync_error(
        &mut self,
        topic_id: TopicId,
        source: &str,
        pub_time_max: f64,
    ) -> RegistryResult<f64> {
        let topic = self.registry.topic_by_id_mut(topic_id)?;
        info!(topic = %topic.name(), source = %source, "Will resubmit GD messages after sync error");

        if topic.gd_pub_time_max > pub_time_max {
            warn!(
                topic = %topic.name(),
                tracked = topic.gd_pub_time_max,
                given = pub_time_max,
                "Choosing topic's gd_pub_time_max over the given one"
            );
        }
        topic.raise_gd_pub_time_max(pub_time_max);
        topic.sync_has_gd_msg = true;
        topic.sync_has_non_gd_msg = true;
        Ok(topic.gd_pub_time_max)
    }

    /// Record a delivery owner, folding in the subscription's endpoint.
    pub fn set_owner(&mut self, config: DeliveryOwnerConfig) -> RegistryResult<()> {
        let sub = self.registry.subscription(&config.sub_key)?;
        let endpoint_id = sub.endpoint_id();
        let endpoint_name = self
            .registry
            .endpoint_by_id(endpoint_id)
            .ok()
            .map(|endpoint| endpoint.name().to_string());

        let owner = DeliveryOwner::from_config(config, endpoint_id, endpoint_name);
        info!(
            sub_key = %owner.sub_key,
            wsx = owner.is_wsx(),
            srv = owner.endpoint_type == EndpointType::Service,
            server = %owner.server_name,
            pid = owner.server_pid,
            "Set delivery owner"
        );
        self.router.set(owner);

        let table = self.format_owners(DEFAULT_SUB_PATTERN_MATCHED);
        info!("Current delivery owners:\n{table}");
        Ok(())
    }

    /// Re-resolve hooks of topics backed by any of the deployed services.
    pub fn refresh_hooks(&mut self, services_deployed: &[i64], invoker: &dyn ServiceInvoker) -> usize {
        let mut refreshed = 0;
        for topic in self.registry.topics_mut() {
            let Some(service_id) = topic.config.hook_service_id else {
                continue;
            };
            if !services_deployed.contains(&service_id) {
                continue;
            }

            let service_name = invoker
                .service_name_by_id(service_id)
                .or_else(|| topic.config.hook_service_name.clone());
            topic.hooks = HookBindings::resolve(service_name.as_deref(), invoker);
            topic.config.hook_service_name = service_name;
            refreshed += 1;

            info!(topic = %topic.name(), service_id, "Refreshed topic hooks");
        }
        refreshed
    }

    pub fn format_owners(&self, default_pattern: &str) -> String {
        format_owner_table(
            self.router.owners(),
            &self.owner_table_columns,
            |sub_key| {
                self.registry
                    .get_subscription(sub_key)
                    .and_then(|sub| sub.sub_pattern_matched())
                    .map(str::to_string)
            },
            default_pattern,
        )
    }
}
