//! Public façade of the broker core.
//!
//! [`PubSub`] owns the broker lock. Every public method acquires it,
//! delegates to lock-free helpers on [`state::BrokerState`] and releases it
//! before any call into a collaborator (service invocation, durable store,
//! remote servers, broker channel).
//!
//! # Example
//!
//! ```ignore
//! use pubsub_core::pubsub::{Collaborators, PubSub, PublishOptions};
//!
//! let pubsub = PubSub::new(&config, collaborators);
//! pubsub.create_topic_object(TopicConfig::new(1, "/orders")).await;
//!
//! let sub_key = pubsub.subscribe("/orders", options).await?;
//! let msg_id = pubsub.publish("/orders", PublishOptions::new(data)).await?;
//! ```

mod api;
mod broker_msg;
mod catalog;
mod error;
mod hooks;
pub mod names;
mod owners;
pub(crate) mod state;
mod store;


use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::backlog::OverflowSink;
use crate::config::{Config, PubSubConfig, ServerIdentity, TopicDefaults};
use crate::interfaces::{BrokerClient, DurableStore, RemoteInvoker, ServiceInvoker};
use crate::model::{TopicConfig, TopicId};
use state::BrokerState;

pub use api::{
    MigrateRequest, NonGdLocation, PublishOptions, Published, ReadQuery, SubscribeOptions,
    WsxContext,
};
pub use error::{PubSubError, Result};
pub(crate) use hooks::topic_context;

/// External collaborators of a broker instance.
#[derive(Clone)]
pub struct Collaborators {
    pub invoker: Arc<dyn ServiceInvoker>,
    pub remote: Arc<dyn RemoteInvoker>,
    pub store: Arc<dyn DurableStore>,
    pub broker: Arc<dyn BrokerClient>,
    pub overflow: Arc<dyn OverflowSink>,
}

/// Broker instance of one server process.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PubSub {
    state: Arc<Mutex<BrokerState>>,
    server: Arc<ServerIdentity>,
    config: Arc<PubSubConfig>,
    topic_defaults: Arc<TopicDefaults>,
    collaborators: Collaborators,
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("server", &self.server)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PubSub {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let state = BrokerState::new(
            collaborators.overflow.clone(),
            config.pubsub.owner_table_columns,
        );

        Self {
            state: Arc::new(Mutex::new(state)),
            server: Arc::new(config.server.clone()),
            config: Arc::new(config.pubsub.clone()),
            topic_defaults: Arc::new(config.topic_defaults.clone()),
            collaborators,
        }
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub fn topic_defaults(&self) -> &TopicDefaults {
        &self.topic_defaults
    }

    pub fn invoker(&self) -> &Arc<dyn ServiceInvoker> {
        &self.collaborators.invoker
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.collaborators.store
    }

    /// Topic configuration with this broker's defaults applied.
    pub fn topic_config(&self, topic_id: TopicId, name: impl Into<String>) -> TopicConfig {
        let defaults = &self.topic_defaults;
        let mut config = TopicConfig::new(topic_id, name);
        config.task_sync_interval_ms = defaults.task_sync_interval_ms;
        config.task_delivery_interval_ms = defaults.task_delivery_interval_ms;
        config.depth_check_freq = defaults.depth_check_freq;
        config.max_depth_gd = defaults.max_depth_gd;
        config.max_depth_non_gd = defaults.max_depth_non_gd;
        config.pub_buffer_size_gd = defaults.pub_buffer_size_gd;
        config
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().await
    }
}
