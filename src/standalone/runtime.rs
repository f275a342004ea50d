//! Runtime implementation for standalone mode.
//!
//! Wires a broker instance to in-process collaborators and runs its
//! background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use super::channel::{spawn_broker_listener, ChannelBrokerClient};
use super::invoker::{LocalServiceInvoker, ServiceHandler};
use super::platform::{self, Platform};
use super::store::InMemoryDurableStore;
use crate::backlog::TracingOverflowSink;
use crate::config::Config;
use crate::hooks::HookKind;
use crate::model::{EndpointConfig, EndpointId, EndpointType};
use crate::pubsub::{Collaborators, PubSub};
use crate::sync::{spawn_sync_task, SyncTaskHandle};

/// How long shutdown waits for the sync task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-process broker.
///
/// Manages:
/// - the broker instance and its sync loop
/// - the in-process broker channel and its listener
/// - platform and user services
/// - the in-memory durable store
pub struct StandaloneRuntime {
    pubsub: PubSub,
    invoker: Arc<LocalServiceInvoker>,
    store: Arc<InMemoryDurableStore>,
    broker: Arc<ChannelBrokerClient>,
    sync_task: SyncTaskHandle,
    listener: JoinHandle<()>,
}

impl StandaloneRuntime {
    /// Build the runtime and start its background tasks.
    ///
    /// The default internal endpoint and the service endpoint are created,
    /// both allowed to publish and subscribe to every topic.
    pub async fn start(config: &Config) -> Self {
        let invoker = Arc::new(LocalServiceInvoker::new(&config.server.server_name));
        let store = Arc::new(InMemoryDurableStore::new());
        let broker = Arc::new(ChannelBrokerClient::new());

        let pubsub = PubSub::new(
            config,
            Collaborators {
                invoker: invoker.clone(),
                remote: invoker.clone(),
                store: store.clone(),
                broker: broker.clone(),
                overflow: Arc::new(TracingOverflowSink),
            },
        );

        let platform = Arc::new(Platform::new(pubsub.clone(), broker.clone(), store.clone()));
        platform::register(&platform, &invoker);

        let listener = spawn_broker_listener(pubsub.clone(), broker.subscribe());

        pubsub
            .create_endpoint(open_endpoint(
                1,
                &config.pubsub.default_internal_endpoint_name,
            ))
            .await;
        pubsub
            .create_endpoint(open_endpoint(2, &config.pubsub.service_endpoint_name))
            .await;

        let sync_task = spawn_sync_task(pubsub.clone());

        info!(
            server = %config.server.server_name,
            pid = config.server.server_pid,
            services = invoker.len(),
            "Standalone runtime started"
        );

        Self {
            pubsub,
            invoker,
            store,
            broker,
            sync_task,
            listener,
        }
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    pub fn invoker(&self) -> &Arc<LocalServiceInvoker> {
        &self.invoker
    }

    pub fn store(&self) -> &Arc<InMemoryDurableStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<ChannelBrokerClient> {
        &self.broker
    }

    /// Deploy a user service, optionally implementing topic hooks.
    pub fn register_service(
        &self,
        name: &str,
        service_id: Option<i64>,
        handler: Arc<dyn ServiceHandler>,
        hooks: &[HookKind],
    ) {
        self.invoker.register(name, service_id, handler);
        self.invoker.set_hooks(name, hooks);
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Runtime running, press Ctrl+C to exit");
        tokio::signal::ctrl_c().await?;
        self.shutdown().await;
        Ok(())
    }

    /// Stop background tasks and drop all services.
    pub async fn shutdown(self) {
        info!("Shutting down runtime");
        self.sync_task.shutdown(SHUTDOWN_TIMEOUT).await;
        self.listener.abort();
        // Services hold the broker instance
        self.invoker.clear();
    }
}

fn open_endpoint(id: EndpointId, name: &str) -> EndpointConfig {
    EndpointConfig {
        id,
        name: name.to_string(),
        endpoint_type: EndpointType::Service,
        is_active: true,
        is_internal: true,
        security_id: None,
        ws_channel_id: None,
        service_id: None,
        pub_topic_patterns: vec!["*".to_string()],
        sub_topic_patterns: vec!["*".to_string()],
    }
}
