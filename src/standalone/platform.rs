//! Platform services the broker core calls, hosted in-process.
//!
//! Topic and subscription creation go through the broker channel the way
//! they would between processes. Delivery tasks are per-sub_key queues
//! kept here: messages handed over by the sync loop wait in them until
//! pulled, unless the subscription delivers to a service.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::channel::ChannelBrokerClient;
use super::invoker::{handler_fn, LocalServiceInvoker, ServiceHandler};
use super::store::InMemoryDurableStore;
use crate::hooks::HookAction;
use crate::interfaces::service_invoker::Result;
use crate::interfaces::{BrokerClient, BrokerMessage, DeliveryServerRecord, InvokeError};
use crate::model::{
    EndpointId, EndpointType, OnNoSubsPub, PubMessage, SubscriptionConfig, TopicConfig,
};
use crate::pubsub::{names, PubSub};
use crate::utils::time::{new_cid, new_msg_id, new_sub_key, utcnow_as_ms};

fn failed(service: &str, e: impl std::fmt::Display) -> InvokeError {
    InvokeError::Failed {
        service: service.to_string(),
        message: e.to_string(),
    }
}

/// Ids of `messages` that came from the durable store.
fn gd_ids_in(messages: &[Value], gd_ids: &[String]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|msg| msg.get("pub_msg_id").and_then(Value::as_str))
        .filter(|id| gd_ids.iter().any(|gd_id| gd_id == id))
        .map(str::to_string)
        .collect()
}

fn str_field(service: &str, request: &Value, name: &str) -> Result<String> {
    request
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| failed(service, format!("missing field '{name}'")))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    topic_name: String,
    endpoint_id: EndpointId,
    #[serde(default)]
    is_internal: bool,
    #[serde(default = "default_true")]
    wrap_one_msg_in_list: bool,
    delivery_batch_size: u32,
    #[serde(default)]
    sub_pattern_matched: Option<String>,
    #[serde(default)]
    pub_client_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    topic_name: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    data_list: Vec<Value>,
    #[serde(default)]
    msg_id: Option<String>,
    #[serde(default)]
    has_gd: Option<bool>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    expiration: Option<u64>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    correl_id: Option<String>,
    #[serde(default)]
    in_reply_to: Option<String>,
    #[serde(default)]
    ext_client_id: Option<String>,
    endpoint_id: EndpointId,
    #[serde(default)]
    zato_ctx: Value,
}

impl PublishRequest {
    fn message(&self, msg_id: String, data: Value, topic_id: i64, has_gd: bool) -> PubMessage {
        let mut msg = PubMessage::new(msg_id, utcnow_as_ms(), topic_id, &self.topic_name, data);
        msg.has_gd = has_gd;
        msg.priority = self.priority;
        msg.expiration = self.expiration;
        msg.mime_type = self.mime_type.clone();
        msg.correl_id = self.correl_id.clone();
        msg.in_reply_to = self.in_reply_to.clone();
        msg.ext_client_id = self.ext_client_id.clone();
        msg.published_by_id = Some(self.endpoint_id);
        msg
    }
}

#[derive(Debug, Deserialize)]
struct NotifiedMessage {
    sub_key: String,
    #[serde(flatten)]
    message: PubMessage,
}

#[derive(Debug, Deserialize)]
struct SyncNotice {
    topic_name: String,
    subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    non_gd_msg_list: Vec<NotifiedMessage>,
    #[serde(default)]
    has_gd_msg_list: bool,
    pub_time_max: f64,
}

#[derive(Debug, Deserialize)]
struct DeliverRequest {
    msg: Value,
    subscription: SubscriptionConfig,
}

/// State behind the in-process platform services.
pub(crate) struct Platform {
    pubsub: PubSub,
    broker: Arc<ChannelBrokerClient>,
    store: Arc<InMemoryDurableStore>,
    next_topic_id: AtomicI64,
    /// Service receiving the messages of each service topic.
    service_targets: RwLock<HashMap<String, String>>,
    /// Messages waiting in each sub_key's delivery task.
    tasks: RwLock<HashMap<String, VecDeque<Value>>>,
}

impl Platform {
    pub fn new(
        pubsub: PubSub,
        broker: Arc<ChannelBrokerClient>,
        store: Arc<InMemoryDurableStore>,
    ) -> Self {
        Self {
            pubsub,
            broker,
            store,
            next_topic_id: AtomicI64::new(1),
            service_targets: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    async fn broadcast(&self, service: &str, msg: BrokerMessage) -> Result<()> {
        self.broker.publish(msg).await.map_err(|e| failed(service, e))
    }

    async fn create_topic(&self, request: Value) -> Result<Value> {
        let mut config: TopicConfig = serde_json::from_value(request)?;
        if let Ok(topic_id) = self.pubsub.topic_id_by_name(&config.name).await {
            return Ok(json!({ "id": topic_id }));
        }

        config.id = self.next_topic_id.fetch_add(1, Ordering::SeqCst);
        let topic_id = config.id;
        info!(topic = %config.name, topic_id, "Creating topic");
        self.broadcast(names::TOPIC_CREATE, BrokerMessage::TopicCreate(config))
            .await?;
        Ok(json!({ "id": topic_id }))
    }

    async fn subscribe(&self, endpoint_type: EndpointType, request: Value) -> Result<Value> {
        let service = endpoint_type.subscribe_service();
        let request: SubscribeRequest = serde_json::from_value(request)?;
        let topic_id = self
            .pubsub
            .topic_id_by_name(&request.topic_name)
            .await
            .map_err(|e| failed(&service, e))?;
        let server = self.pubsub.server();

        let mut config = SubscriptionConfig::new(
            new_sub_key(endpoint_type),
            topic_id,
            &request.topic_name,
            request.endpoint_id,
            endpoint_type,
        );
        config.cluster_id = server.cluster_id;
        config.server_id = (endpoint_type != EndpointType::WebSockets).then_some(server.server_id);
        config.delivery_batch_size = request.delivery_batch_size;
        config.wrap_one_msg_in_list = request.wrap_one_msg_in_list;
        config.sub_pattern_matched = request.sub_pattern_matched;
        config.is_internal = request.is_internal;
        config.ext_client_id = request.pub_client_id;
        config.creation_time = utcnow_as_ms();
        let sub_key = config.sub_key.clone();

        self.store
            .set_delivery_server(
                &sub_key,
                DeliveryServerRecord {
                    cluster_id: server.cluster_id,
                    server_name: server.server_name.clone(),
                    endpoint_type,
                },
            )
            .await;

        // Added here first so the caller can use the sub_key right away
        self.pubsub
            .add_subscription(config.clone())
            .await
            .map_err(|e| failed(&service, e))?;
        self.broadcast(&service, BrokerMessage::SubscriptionCreate(config))
            .await?;

        Ok(json!({ "sub_key": sub_key }))
    }

    async fn publish(&self, request: Value) -> Result<Value> {
        let service = names::PUBLISH;
        let request: PublishRequest = serde_json::from_value(request)?;
        let topic = self
            .pubsub
            .topic_by_name(&request.topic_name)
            .await
            .map_err(|e| failed(service, e))?;
        let has_gd = request.has_gd.unwrap_or_else(|| topic.has_gd());

        if let Some(target) = request.zato_ctx.get("target_service_name").and_then(Value::as_str) {
            self.service_targets
                .write()
                .await
                .insert(request.topic_name.clone(), target.to_string());
        }

        let is_list = !request.data_list.is_empty();
        let messages: Vec<PubMessage> = if is_list {
            request
                .data_list
                .iter()
                .map(|data| request.message(new_msg_id(), data.clone(), topic.id(), has_gd))
                .collect()
        } else {
            let msg_id = request.msg_id.clone().unwrap_or_else(new_msg_id);
            vec![request.message(msg_id, request.data.clone(), topic.id(), has_gd)]
        };

        let mut kept = Vec::with_capacity(messages.len());
        for msg in messages {
            let action = self
                .pubsub
                .before_publish(topic.name(), &serde_json::to_value(&msg)?)
                .await
                .map_err(|e| failed(service, e))?;
            if action == HookAction::Deliver {
                kept.push(msg);
            } else {
                info!(topic = %topic.name(), msg_id = %msg.pub_msg_id, ?action, "Message not published");
            }
        }
        let messages = kept;
        let msg_ids: Vec<String> = messages.iter().map(|m| m.pub_msg_id.clone()).collect();
        if messages.is_empty() {
            // Nothing was published, not even a single message
            return Ok(json!({ "msg_id_list": msg_ids }));
        }

        let sub_keys: Vec<String> = self
            .pubsub
            .subscriptions_by_topic(topic.name(), false)
            .await
            .iter()
            .map(|sub| sub.sub_key().to_string())
            .collect();

        if sub_keys.is_empty() {
            if topic.config.on_no_subs_pub == OnNoSubsPub::Drop {
                info!(topic = %topic.name(), messages = messages.len(), "No subscribers, messages dropped");
            } else {
                debug!(topic = %topic.name(), messages = messages.len(), "No subscribers yet");
            }
        } else if has_gd {
            let cluster_id = self.pubsub.server().cluster_id;
            let pub_time_max = messages.iter().map(|m| m.pub_time).fold(0.0, f64::max);
            for sub_key in &sub_keys {
                for msg in &messages {
                    self.store.enqueue(cluster_id, sub_key, msg.clone()).await;
                }
            }
            self.pubsub
                .set_sync_has_msg(topic.id(), true, true, "publish", pub_time_max)
                .await
                .map_err(|e| failed(service, e))?;
        } else {
            self.pubsub
                .store_in_ram(&new_cid(), topic.id(), topic.name(), &sub_keys, messages, "publish")
                .await
                .map_err(|e| failed(service, e))?;
        }

        if is_list {
            Ok(json!({ "msg_id_list": msg_ids }))
        } else {
            Ok(json!({ "msg_id": msg_ids.first() }))
        }
    }

    async fn create_delivery_task(&self, request: Value) -> Result<Value> {
        let sub_key = str_field(names::CREATE_DELIVERY_TASK, &request, "sub_key")?;
        info!(sub_key = %sub_key, "Created delivery task");
        self.tasks.write().await.entry(sub_key).or_default();
        Ok(json!({}))
    }

    async fn delete_delivery_task(&self, request: Value) -> Result<Value> {
        let sub_key = str_field(names::DELETE_DELIVERY_TASK, &request, "sub_key")?;
        let pending = self
            .tasks
            .write()
            .await
            .remove(&sub_key)
            .map(|queue| queue.len())
            .unwrap_or(0);
        self.store
            .remove_sub_key(self.pubsub.server().cluster_id, &sub_key)
            .await;
        info!(sub_key = %sub_key, pending, "Deleted delivery task");
        Ok(json!({}))
    }

    /// Hand messages announced by the sync loop to delivery tasks.
    async fn after_publish(&self, request: Value) -> Result<Value> {
        let service = names::AFTER_PUBLISH;
        let notice: SyncNotice = serde_json::from_value(request)?;
        let target = self
            .service_targets
            .read()
            .await
            .get(&notice.topic_name)
            .cloned();
        let mut delivered = 0usize;

        for sub in &notice.subscriptions {
            let mut batch: Vec<Value> = notice
                .non_gd_msg_list
                .iter()
                .filter(|queued| queued.sub_key == sub.sub_key)
                .map(|queued| serde_json::to_value(&queued.message))
                .collect::<std::result::Result<_, _>>()?;

            let mut gd_ids = Vec::new();
            if notice.has_gd_msg_list {
                let stored = self
                    .pubsub
                    .get_sql_messages_by_sub_key(
                        std::slice::from_ref(&sub.sub_key),
                        0.0,
                        notice.pub_time_max,
                        &HashSet::new(),
                    )
                    .await
                    .map_err(|e| failed(service, e))?;
                for stored in stored {
                    gd_ids.push(stored.message.pub_msg_id.clone());
                    batch.push(serde_json::to_value(&stored.message)?);
                }
            }

            if batch.is_empty() {
                continue;
            }

            let classified = self
                .pubsub
                .before_delivery(&notice.topic_name, batch)
                .await
                .map_err(|e| failed(service, e))?;
            for (msg, e) in &classified.failed {
                warn!(sub_key = %sub.sub_key, msg_id = ?msg.get("pub_msg_id"), error = %e, "Message not classified");
            }
            if !classified.skip.is_empty() || !classified.drop.is_empty() {
                info!(
                    sub_key = %sub.sub_key,
                    skipped = classified.skip.len(),
                    dropped = classified.drop.len(),
                    "Messages held back before delivery"
                );
            }

            // Skipped and failed GD messages stay in the store for the next notification
            let dropped_ids = gd_ids_in(&classified.drop, &gd_ids);
            if !dropped_ids.is_empty() {
                self.pubsub
                    .set_to_delete(&sub.sub_key, &dropped_ids)
                    .await
                    .map_err(|e| failed(service, e))?;
            }
            let gd_ids = gd_ids_in(&classified.deliver, &gd_ids);

            let batch = classified.deliver;
            if batch.is_empty() {
                continue;
            }
            delivered += batch.len();

            if target.is_some() && sub.endpoint_type == EndpointType::Service {
                self.pubsub
                    .deliver_pubsub_msg(&sub.sub_key, Value::Array(batch))
                    .await
                    .map_err(|e| failed(service, e))?;
            } else {
                self.tasks
                    .write()
                    .await
                    .entry(sub.sub_key.clone())
                    .or_default()
                    .extend(batch);
            }

            if !gd_ids.is_empty() {
                self.pubsub
                    .confirm_pubsub_msg_delivered(&sub.sub_key, &gd_ids)
                    .await
                    .map_err(|e| failed(service, e))?;
            }
        }

        debug!(topic = %notice.topic_name, delivered, "Delivery tasks notified");
        Ok(json!({ "delivered": delivered }))
    }

    /// Invoke the target service of a service topic once per message.
    async fn deliver_message(&self, request: Value) -> Result<Value> {
        let service = names::DELIVER_MESSAGE;
        let request: DeliverRequest = serde_json::from_value(request)?;
        let topic_name = &request.subscription.topic_name;
        let target = self
            .service_targets
            .read()
            .await
            .get(topic_name)
            .cloned()
            .ok_or_else(|| failed(service, format!("no target service for topic '{topic_name}'")))?;

        let messages = match request.msg {
            Value::Array(messages) => messages,
            msg => vec![msg],
        };
        for msg in &messages {
            let data = msg.get("data").cloned().unwrap_or(Value::Null);
            self.pubsub.invoker().invoke(&target, data).await?;
        }
        debug!(target = %target, messages = messages.len(), "Delivered to service");
        Ok(json!({}))
    }

    async fn server_pid_for_sub_key(&self, request: Value) -> Result<Value> {
        let sub_key = str_field(names::GET_SERVER_PID_FOR_SUB_KEY, &request, "sub_key")?;
        let server = self.pubsub.server();
        let server_pid = self
            .pubsub
            .get_delivery_server_by_sub_key(&sub_key)
            .await
            .filter(|owner| owner.is_process(server.cluster_id, &server.server_name, server.server_pid))
            .map(|owner| owner.server_pid)
            .unwrap_or(0);
        Ok(json!({ "server_pid": server_pid }))
    }

    async fn get_delivery_messages(&self, request: Value) -> Result<Value> {
        let sub_key = str_field(names::GET_DELIVERY_MESSAGES, &request, "sub_key")?;
        let messages: Vec<Value> = self
            .tasks
            .write()
            .await
            .get_mut(&sub_key)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default();
        Ok(Value::Array(messages))
    }

    async fn read_messages_non_gd(&self, request: Value) -> Result<Value> {
        let sub_key = str_field(names::READ_MESSAGES_NON_GD, &request, "sub_key")?;
        let query = request.get("query").and_then(Value::as_str);
        let messages: Vec<Value> = self
            .tasks
            .read()
            .await
            .get(&sub_key)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|msg| matches_query(msg, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(messages))
    }

    async fn read_messages_gd(&self, request: Value) -> Result<Value> {
        let service = names::READ_MESSAGES_GD;
        let sub_key = str_field(service, &request, "sub_key")?;
        let query = request.get("query").and_then(Value::as_str);
        let stored = self
            .pubsub
            .get_sql_messages_by_sub_key(&[sub_key], 0.0, f64::MAX, &HashSet::new())
            .await
            .map_err(|e| failed(service, e))?;

        let mut messages = Vec::new();
        for stored in stored {
            let msg = serde_json::to_value(&stored.message)?;
            if matches_query(&msg, query) {
                messages.push(msg);
            }
        }
        Ok(Value::Array(messages))
    }

    async fn read_message_non_gd(&self, request: Value) -> Result<Value> {
        let service = names::READ_MESSAGE_NON_GD;
        let sub_key = str_field(service, &request, "sub_key")?;
        let msg_id = str_field(service, &request, "msg_id")?;
        Ok(self
            .tasks
            .read()
            .await
            .get(&sub_key)
            .and_then(|queue| queue.iter().find(|msg| msg["pub_msg_id"] == msg_id.as_str()))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn read_message_gd(&self, request: Value) -> Result<Value> {
        let service = names::READ_MESSAGE_GD;
        let msg_id = str_field(service, &request, "msg_id")?;
        let topic_id = request
            .get("topic_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| failed(service, "missing field 'topic_id'"))?;
        let topic = self
            .pubsub
            .topic_by_id(topic_id)
            .await
            .map_err(|e| failed(service, e))?;

        for sub in self.pubsub.subscriptions_by_topic(topic.name(), false).await {
            let found = self
                .pubsub
                .get_sql_messages_by_msg_id_list(sub.sub_key(), f64::MAX, std::slice::from_ref(&msg_id))
                .await
                .map_err(|e| failed(service, e))?;
            if let Some(stored) = found.into_iter().next() {
                return Ok(serde_json::to_value(&stored.message)?);
            }
        }
        Ok(Value::Null)
    }

    async fn delete_message_non_gd(&self, request: Value) -> Result<Value> {
        let service = names::DELETE_MESSAGE_NON_GD;
        let sub_key = str_field(service, &request, "sub_key")?;
        let msg_id = str_field(service, &request, "msg_id")?;
        let mut tasks = self.tasks.write().await;
        let deleted = tasks
            .get_mut(&sub_key)
            .map(|queue| {
                let before = queue.len();
                queue.retain(|msg| msg["pub_msg_id"] != msg_id.as_str());
                before - queue.len()
            })
            .unwrap_or(0);
        Ok(json!({ "deleted": deleted }))
    }

    async fn delete_message_gd(&self, request: Value) -> Result<Value> {
        let service = names::DELETE_MESSAGE_GD;
        let sub_key = str_field(service, &request, "sub_key")?;
        let msg_id = str_field(service, &request, "msg_id")?;
        self.pubsub
            .set_to_delete(&sub_key, &[msg_id])
            .await
            .map_err(|e| failed(service, e))?;
        Ok(json!({}))
    }

    async fn migrate_delivery_server(&self, request: Value) -> Result<Value> {
        let service = names::MIGRATE_DELIVERY_SERVER;
        let new_server = str_field(service, &request, "new_delivery_server_name")?;
        if new_server != self.pubsub.server().server_name {
            return Err(failed(service, format!("no such server '{new_server}'")));
        }
        warn!(server = %new_server, "Delivery task already runs on this server");
        Ok(json!({}))
    }
}

fn matches_query(msg: &Value, query: Option<&str>) -> bool {
    let Some(query) = query else {
        return true;
    };
    ["pub_msg_id", "correl_id", "in_reply_to", "ext_client_id"]
        .iter()
        .filter_map(|name| msg.get(*name).and_then(Value::as_str))
        .any(|value| value.contains(query))
}

fn route<F, Fut>(platform: &Arc<Platform>, f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(Arc<Platform>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let platform = Arc::clone(platform);
    handler_fn(move |request| f(Arc::clone(&platform), request).boxed())
}

/// Register every platform service with the invoker.
pub(crate) fn register(platform: &Arc<Platform>, invoker: &LocalServiceInvoker) {
    invoker.register(
        names::TOPIC_CREATE,
        None,
        route(platform, |p, r| async move { p.create_topic(r).await }),
    );
    for endpoint_type in EndpointType::ALL {
        invoker.register(
            endpoint_type.subscribe_service(),
            None,
            route(platform, move |p, r| async move {
                p.subscribe(endpoint_type, r).await
            }),
        );
    }
    invoker.register(
        names::PUBLISH,
        None,
        route(platform, |p, r| async move { p.publish(r).await }),
    );
    invoker.register(
        names::AFTER_PUBLISH,
        None,
        route(platform, |p, r| async move { p.after_publish(r).await }),
    );
    invoker.register(
        names::CREATE_DELIVERY_TASK,
        None,
        route(platform, |p, r| async move { p.create_delivery_task(r).await }),
    );
    invoker.register(
        names::DELETE_DELIVERY_TASK,
        None,
        route(platform, |p, r| async move { p.delete_delivery_task(r).await }),
    );
    invoker.register(
        names::DELIVER_MESSAGE,
        None,
        route(platform, |p, r| async move { p.deliver_message(r).await }),
    );
    invoker.register(
        names::GET_SERVER_PID_FOR_SUB_KEY,
        None,
        route(platform, |p, r| async move { p.server_pid_for_sub_key(r).await }),
    );
    invoker.register(
        names::MIGRATE_DELIVERY_SERVER,
        None,
        route(platform, |p, r| async move { p.migrate_delivery_server(r).await }),
    );
    invoker.register(
        names::GET_DELIVERY_MESSAGES,
        None,
        route(platform, |p, r| async move { p.get_delivery_messages(r).await }),
    );
    invoker.register(
        names::READ_MESSAGES_GD,
        None,
        route(platform, |p, r| async move { p.read_messages_gd(r).await }),
    );
    invoker.register(
        names::READ_MESSAGES_NON_GD,
        None,
        route(platform, |p, r| async move { p.read_messages_non_gd(r).await }),
    );
    invoker.register(
        names::READ_MESSAGE_GD,
        None,
        route(platform, |p, r| async move { p.read_message_gd(r).await }),
    );
    invoker.register(
        names::READ_MESSAGE_NON_GD,
        None,
        route(platform, |p, r| async move { p.read_message_non_gd(r).await }),
    );
    invoker.register(
        names::DELETE_MESSAGE_GD,
        None,
        route(platform, |p, r| async move { p.delete_message_gd(r).await }),
    );
    invoker.register(
        names::DELETE_MESSAGE_NON_GD,
        None,
        route(platform, |p, r| async move { p.delete_message_non_gd(r).await }),
    );
}
