//! Test utilities and mock implementations.
//!
//! This module provides mock implementations of the broker's collaborators
//! for testing without a durable store, remote servers or a service runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::backlog::OverflowSink;
use crate::config::Config;
use crate::hooks::HookKind;
use crate::interfaces::durable_store::Result as StoreResult;
use crate::interfaces::service_invoker::Result as InvokeResult;
use crate::interfaces::{
    BrokerClient, BrokerMessage, DeliveryServerRecord, DurableStore, InvokeError, RemoteInvoker,
    ServiceInvoker, StoreError, StoredMessage,
};
use crate::model::{
    ClusterId, DeliveryOwnerConfig, EndpointConfig, EndpointId, EndpointType, PubMessage,
    SubscriptionConfig, TopicConfig, TopicId,
};
use crate::pubsub::{Collaborators, PubSub};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock service invoker recording every call.
///
/// Responses are taken from a per-service queue first, then from the
/// service's default response, and finally default to `{}`.
#[derive(Default)]
pub struct MockServiceInvoker {
    queued: RwLock<HashMap<String, VecDeque<Value>>>,
    defaults: RwLock<HashMap<String, Value>>,
    failing: RwLock<HashSet<String>>,
    invocations: RwLock<Vec<(String, Value)>>,
    services: Mutex<HashMap<String, Option<i64>>>,
    hooks: Mutex<HashMap<String, HashSet<HookKind>>>,
}

impl MockServiceInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response returned by every call to `service`.
    pub async fn set_response(&self, service: &str, response: Value) {
        self.defaults
            .write()
            .await
            .insert(service.to_string(), response);
    }

    /// Response returned by the next call to `service` only.
    pub async fn push_response(&self, service: &str, response: Value) {
        self.queued
            .write()
            .await
            .entry(service.to_string())
            .or_default()
            .push_back(response);
    }

    pub async fn set_fail(&self, service: &str, fail: bool) {
        let mut failing = self.failing.write().await;
        if fail {
            failing.insert(service.to_string());
        } else {
            failing.remove(service);
        }
    }

    /// Register a deployed service.
    pub fn add_service(&self, name: &str, service_id: Option<i64>) {
        locked(&self.services).insert(name.to_string(), service_id);
    }

    /// Declare which hooks a service implements.
    pub fn set_hooks(&self, service: &str, kinds: &[HookKind]) {
        locked(&self.hooks).insert(service.to_string(), kinds.iter().copied().collect());
    }

    pub async fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.read().await.clone()
    }

    pub async fn invocations_of(&self, service: &str) -> Vec<Value> {
        self.invocations
            .read()
            .await
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub async fn invocation_count(&self, service: &str) -> usize {
        self.invocations_of(service).await.len()
    }

    /// Wait until `service` was invoked at least `count` times.
    pub async fn wait_for(&self, service: &str, count: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.invocation_count(service).await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

#[async_trait]
impl ServiceInvoker for MockServiceInvoker {
    async fn invoke(&self, service: &str, request: Value) -> InvokeResult<Value> {
        self.invocations
            .write()
            .await
            .push((service.to_string(), request));

        if self.failing.read().await.contains(service) {
            return Err(InvokeError::Failed {
                service: service.to_string(),
                message: "mock failure".to_string(),
            });
        }

        if let Some(response) = self
            .queued
            .write()
            .await
            .get_mut(service)
            .and_then(VecDeque::pop_front)
        {
            return Ok(response);
        }

        Ok(self
            .defaults
            .read()
            .await
            .get(service)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    fn has_service(&self, service: &str) -> bool {
        locked(&self.services).contains_key(service)
    }

    fn service_name_by_id(&self, service_id: i64) -> Option<String> {
        locked(&self.services)
            .iter()
            .find(|(_, id)| **id == Some(service_id))
            .map(|(name, _)| name.clone())
    }

    fn implements_hook(&self, service: &str, kind: HookKind) -> bool {
        locked(&self.hooks)
            .get(service)
            .is_some_and(|kinds| kinds.contains(&kind))
    }
}

/// Mock durable store with configurable delivery servers and messages.
#[derive(Default)]
pub struct MockDurableStore {
    delivery_servers: RwLock<HashMap<String, DeliveryServerRecord>>,
    messages: RwLock<Vec<StoredMessage>>,
    confirmed: RwLock<Vec<(String, Vec<String>)>>,
    deleted: RwLock<Vec<(String, Vec<String>)>>,
    lookups: RwLock<usize>,
    fail: RwLock<bool>,
}

impl MockDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_delivery_server(&self, sub_key: &str, server_name: &str, endpoint_type: EndpointType) {
        self.delivery_servers.write().await.insert(
            sub_key.to_string(),
            DeliveryServerRecord {
                cluster_id: 1,
                server_name: server_name.to_string(),
                endpoint_type,
            },
        );
    }

    pub async fn add_message(&self, sub_key: &str, message: PubMessage) {
        self.messages.write().await.push(StoredMessage {
            sub_key: sub_key.to_string(),
            message,
            delivery_count: 0,
        });
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    /// Number of delivery server lookups made so far.
    pub async fn lookup_count(&self) -> usize {
        *self.lookups.read().await
    }

    pub async fn confirmed(&self) -> Vec<(String, Vec<String>)> {
        self.confirmed.read().await.clone()
    }

    pub async fn deleted(&self) -> Vec<(String, Vec<String>)> {
        self.deleted.read().await.clone()
    }

    async fn check(&self) -> StoreResult<()> {
        if *self.fail.read().await {
            return Err(StoreError::Unavailable("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MockDurableStore {
    async fn get_delivery_server(
        &self,
        _cluster_id: ClusterId,
        sub_key: &str,
        _is_wsx: bool,
    ) -> StoreResult<Option<DeliveryServerRecord>> {
        *self.lookups.write().await += 1;
        self.check().await?;
        Ok(self.delivery_servers.read().await.get(sub_key).cloned())
    }

    async fn get_messages_by_sub_keys(
        &self,
        _cluster_id: ClusterId,
        sub_keys: &[String],
        last_sql_run: f64,
        pub_time_max: f64,
        ignore_list: &HashSet<String>,
    ) -> StoreResult<Vec<StoredMessage>> {
        self.check().await?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|stored| sub_keys.contains(&stored.sub_key))
            .filter(|stored| {
                stored.message.pub_time > last_sql_run && stored.message.pub_time <= pub_time_max
            })
            .filter(|stored| !ignore_list.contains(&stored.message.pub_msg_id))
            .cloned()
            .collect())
    }

    async fn get_msg_ids_by_sub_key(
        &self,
        _cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
    ) -> StoreResult<Vec<String>> {
        self.check().await?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|stored| stored.sub_key == sub_key && stored.message.pub_time <= pub_time_max)
            .map(|stored| stored.message.pub_msg_id.clone())
            .collect())
    }

    async fn get_messages_by_msg_ids(
        &self,
        _cluster_id: ClusterId,
        sub_key: &str,
        pub_time_max: f64,
        msg_ids: &[String],
    ) -> StoreResult<Vec<StoredMessage>> {
        self.check().await?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|stored| stored.sub_key == sub_key && stored.message.pub_time <= pub_time_max)
            .filter(|stored| msg_ids.contains(&stored.message.pub_msg_id))
            .cloned()
            .collect())
    }

    async fn confirm_delivered(
        &self,
        _cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        _now: f64,
    ) -> StoreResult<()> {
        self.check().await?;
        self.confirmed
            .write()
            .await
            .push((sub_key.to_string(), msg_ids.to_vec()));
        Ok(())
    }

    async fn set_to_delete(
        &self,
        _cluster_id: ClusterId,
        sub_key: &str,
        msg_ids: &[String],
        _now: f64,
    ) -> StoreResult<()> {
        self.check().await?;
        self.deleted
            .write()
            .await
            .push((sub_key.to_string(), msg_ids.to_vec()));
        Ok(())
    }
}

/// Mock of the other servers in the cluster.
#[derive(Default)]
pub struct MockRemoteInvoker {
    pids: RwLock<HashMap<(String, String), u32>>,
    unreachable: RwLock<HashSet<String>>,
    delay: RwLock<Option<Duration>>,
    calls: RwLock<Vec<(String, String)>>,
}

impl MockRemoteInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process of `server_name` delivering messages for `sub_key`.
    pub async fn set_pid(&self, server_name: &str, sub_key: &str, pid: u32) {
        self.pids
            .write()
            .await
            .insert((server_name.to_string(), sub_key.to_string()), pid);
    }

    pub async fn set_unreachable(&self, server_name: &str) {
        self.unreachable
            .write()
            .await
            .insert(server_name.to_string());
    }

    /// Delay every response.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// `(server_name, service)` of every call made.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl RemoteInvoker for MockRemoteInvoker {
    async fn invoke_server(
        &self,
        server_name: &str,
        service: &str,
        request: Value,
    ) -> InvokeResult<Value> {
        self.calls
            .write()
            .await
            .push((server_name.to_string(), service.to_string()));

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.read().await.contains(server_name) {
            return Err(InvokeError::Unreachable {
                server: server_name.to_string(),
                message: "mock unreachable".to_string(),
            });
        }

        let sub_key = request
            .get("sub_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let pid = self
            .pids
            .read()
            .await
            .get(&(server_name.to_string(), sub_key))
            .copied()
            .unwrap_or(0);
        Ok(json!({ "server_pid": pid }))
    }
}

/// Mock broker channel that records published messages.
#[derive(Default)]
pub struct MockBrokerClient {
    published: RwLock<Vec<BrokerMessage>>,
    fail_on_publish: RwLock<bool>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published(&self) -> Vec<BrokerMessage> {
        self.published.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<BrokerMessage> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn publish(&self, msg: BrokerMessage) -> InvokeResult<()> {
        if *self.fail_on_publish.read().await {
            return Err(InvokeError::ChannelClosed);
        }
        self.published.write().await.push(msg);
        Ok(())
    }
}

/// Overflow sink keeping `(topic_name, sub_key, pub_msg_id)` of each message.
#[derive(Debug, Default)]
pub struct MemoryOverflowSink {
    overflowed: Mutex<Vec<(String, String, String)>>,
}

impl MemoryOverflowSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overflowed(&self) -> Vec<(String, String, String)> {
        locked(&self.overflowed).clone()
    }
}

impl OverflowSink for MemoryOverflowSink {
    fn overflow(&self, topic_name: &str, sub_key: &str, msg: &PubMessage) {
        locked(&self.overflowed).push((
            topic_name.to_string(),
            sub_key.to_string(),
            msg.pub_msg_id.clone(),
        ));
    }
}

/// A broker wired to mocks, with handles to each of them.
pub struct TestBroker {
    pub pubsub: PubSub,
    pub invoker: Arc<MockServiceInvoker>,
    pub remote: Arc<MockRemoteInvoker>,
    pub store: Arc<MockDurableStore>,
    pub broker: Arc<MockBrokerClient>,
    pub overflow: Arc<MemoryOverflowSink>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::with_config(Config::for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let invoker = Arc::new(MockServiceInvoker::new());
        let remote = Arc::new(MockRemoteInvoker::new());
        let store = Arc::new(MockDurableStore::new());
        let broker = Arc::new(MockBrokerClient::new());
        let overflow = Arc::new(MemoryOverflowSink::new());

        let pubsub = PubSub::new(
            &config,
            Collaborators {
                invoker: invoker.clone(),
                remote: remote.clone(),
                store: store.clone(),
                broker: broker.clone(),
                overflow: overflow.clone(),
            },
        );

        Self {
            pubsub,
            invoker,
            remote,
            store,
            broker,
            overflow,
        }
    }

    /// Register the default internal endpoint (id 1) and the service
    /// endpoint (id 2), both allowed to use every topic.
    pub async fn add_default_endpoints(&self) {
        let config = self.pubsub.config().clone();
        self.pubsub
            .create_endpoint(make_endpoint(1, &config.default_internal_endpoint_name, EndpointType::Rest))
            .await;
        self.pubsub
            .create_endpoint(make_endpoint(2, &config.service_endpoint_name, EndpointType::Service))
            .await;
    }

    /// Add a topic synced on every pass.
    pub async fn add_topic(&self, topic_id: TopicId, name: &str) {
        self.pubsub
            .create_topic_object(make_topic_config(topic_id, name))
            .await;
    }

    /// Add a subscription of endpoint 1 owned by another process.
    pub async fn add_sub(&self, sub_key: &str, topic_id: TopicId, topic_name: &str) {
        self.pubsub
            .create_subscription_object(make_sub_config(sub_key, topic_id, topic_name, 1))
            .await
            .expect("subscription added");
    }
}

impl Default for TestBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a non-GD message with `{"n": id}` as its payload.
pub fn make_message(id: &str, pub_time: f64, topic_id: TopicId, topic_name: &str) -> PubMessage {
    PubMessage::new(id, pub_time, topic_id, topic_name, json!({ "n": id }))
}

/// Topic configuration with no sync delay.
pub fn make_topic_config(topic_id: TopicId, name: &str) -> TopicConfig {
    TopicConfig::new(topic_id, name).with_task_sync_interval_ms(0)
}

/// REST subscription in cluster 1, not pinned to any server.
pub fn make_sub_config(
    sub_key: &str,
    topic_id: TopicId,
    topic_name: &str,
    endpoint_id: EndpointId,
) -> SubscriptionConfig {
    let mut config =
        SubscriptionConfig::new(sub_key, topic_id, topic_name, endpoint_id, EndpointType::Rest);
    config.cluster_id = 1;
    config
}

/// Endpoint allowed to publish and subscribe to every topic.
pub fn make_endpoint(id: EndpointId, name: &str, endpoint_type: EndpointType) -> EndpointConfig {
    EndpointConfig {
        id,
        name: name.to_string(),
        endpoint_type,
        is_active: true,
        is_internal: true,
        security_id: Some(id * 100),
        ws_channel_id: None,
        service_id: None,
        pub_topic_patterns: vec!["*".to_string()],
        sub_topic_patterns: vec!["*".to_string()],
    }
}

pub fn make_owner_config(sub_key: &str, server_name: &str, server_pid: u32) -> DeliveryOwnerConfig {
    DeliveryOwnerConfig {
        sub_key: sub_key.to_string(),
        cluster_id: 1,
        server_name: server_name.to_string(),
        server_pid,
        endpoint_type: EndpointType::Rest,
        channel_name: None,
        pub_client_id: None,
        wsx_info: None,
    }
}
