//! Publish, subscribe and message access.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{names, PubSub, PubSubError, Result};
use crate::config::DEFAULT_DELIVERY_BATCH_SIZE;
use crate::model::{
    Endpoint, EndpointId, EndpointType, PubMessage, TopicConfig, TopicId, SKIP_TO_EXTERNAL,
};

/// Websocket client subscribing through its current connection.
#[derive(Debug, Clone, Default)]
pub struct WsxContext {
    pub ws_channel_id: i64,
    pub pub_client_id: String,
    /// Remove the subscription once the connection closes.
    pub unsub_on_wsx_close: bool,
}

/// Options of a subscribe request.
///
/// Either `wsx` or `endpoint_name` identifies the subscriber.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub endpoint_name: Option<String>,
    pub wsx: Option<WsxContext>,
    pub is_internal: bool,
    pub wrap_one_msg_in_list: bool,
    pub delivery_batch_size: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            endpoint_name: None,
            wsx: None,
            is_internal: false,
            wrap_one_msg_in_list: true,
            delivery_batch_size: DEFAULT_DELIVERY_BATCH_SIZE,
        }
    }
}

impl SubscribeOptions {
    pub fn for_endpoint(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: Some(endpoint_name.into()),
            ..Default::default()
        }
    }

    pub fn for_wsx(wsx: WsxContext) -> Self {
        Self {
            wsx: Some(wsx),
            ..Default::default()
        }
    }

    pub fn with_delivery_batch_size(mut self, size: u32) -> Self {
        self.delivery_batch_size = size;
        self
    }
}

/// Message and metadata of a publish request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishOptions {
    pub data: Value,
    pub data_list: Vec<Value>,
    pub msg_id: Option<String>,
    pub has_gd: Option<bool>,
    pub priority: Option<u8>,
    pub expiration: Option<u64>,
    pub mime_type: Option<String>,
    pub correl_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub ext_client_id: Option<String>,
    pub ext_pub_time: Option<f64>,
    /// Publisher; the default internal endpoint if no identity is given.
    pub endpoint_id: Option<EndpointId>,
    pub security_id: Option<i64>,
    pub ws_channel_id: Option<i64>,
    pub user_ctx: Option<Value>,
}

impl PublishOptions {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn list(data_list: Vec<Value>) -> Self {
        Self {
            data_list,
            ..Default::default()
        }
    }

    pub fn with_gd(mut self, has_gd: bool) -> Self {
        self.has_gd = Some(has_gd);
        self
    }

    pub fn with_endpoint_id(mut self, endpoint_id: EndpointId) -> Self {
        self.endpoint_id = Some(endpoint_id);
        self
    }
}

/// IDs assigned to published messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    MsgId(String),
    MsgIdList(Vec<String>),
}

/// Query of a non-destructive queue read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadQuery {
    pub query: Option<String>,
    pub paginate: bool,
    pub cur_page: u32,
}

/// Where a non-GD message lives: the sub_key's queue in one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonGdLocation {
    pub sub_key: String,
    pub server_name: String,
    pub server_pid: u32,
}

impl NonGdLocation {
    fn is_complete(&self) -> bool {
        !self.sub_key.is_empty() && !self.server_name.is_empty() && self.server_pid > 0
    }
}

/// Request to move a sub_key's delivery task to another server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrateRequest {
    pub sub_key: String,
    pub old_delivery_server_id: i64,
    pub new_delivery_server_name: String,
    pub endpoint_type: EndpointType,
}

/// Services may wrap their payload in a `response` field.
fn unwrap_response(response: Value) -> Value {
    match response {
        Value::Object(mut fields) if fields.contains_key("response") => {
            fields.remove("response").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn validate_topic_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
        return Err(PubSubError::InvalidTopicName(name.to_string()));
    }
    Ok(())
}

impl PubSub {
    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Ask the platform to create a topic. The topic object itself arrives
    /// through the broker channel.
    pub async fn create_topic(&self, config: TopicConfig) -> Result<TopicId> {
        validate_topic_name(&config.name)?;

        let response = self
            .invoker()
            .invoke(names::TOPIC_CREATE, serde_json::to_value(&config)?)
            .await?;
        let response = unwrap_response(response);

        let topic_id = response
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| PubSubError::InvalidResponse {
                service: names::TOPIC_CREATE.to_string(),
                message: "missing topic id".to_string(),
            })?;

        info!(topic = %config.name, topic_id, "Created topic");
        Ok(topic_id)
    }

    /// Wait until a topic exists locally, up to the configured timeout.
    pub async fn wait_for_topic(&self, topic_name: &str) -> Result<()> {
        let timeout = self.config().wait_for_topic_timeout();
        let poll = self.config().wait_for_topic_poll();
        let started = Instant::now();

        loop {
            if self.has_topic_by_name(topic_name).await {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(PubSubError::TopicWaitTimeout {
                    topic_name: topic_name.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            debug!(topic = %topic_name, "Waiting for topic");
            tokio::time::sleep(poll).await;
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe an endpoint or the current websocket client to a topic.
    /// Returns the new sub_key.
    pub async fn subscribe(&self, topic_name: &str, options: SubscribeOptions) -> Result<String> {
        let (endpoint, sub_pattern_matched, max_depth) = {
            let state = self.lock().await;
            let topic = state.registry.topic_by_name(topic_name)?;
            let max_depth = if topic.has_gd() {
                topic.config.max_depth_gd
            } else {
                topic.config.max_depth_non_gd
            };

            let endpoint = match (&options.wsx, &options.endpoint_name) {
                (Some(wsx), _) => state.registry.endpoint_by_ws_channel_id(wsx.ws_channel_id)?,
                (None, Some(name)) => state.registry.endpoint_by_name(name)?,
                (None, None) => {
                    return Err(PubSubError::MissingEndpoint(
                        "endpoint_name is required for non-WebSockets subscriptions".to_string(),
                    ))
                }
            };
            let pattern = endpoint.sub_pattern_for(topic_name).map(str::to_string);
            (endpoint.clone(), pattern, max_depth)
        };

        let size = options.delivery_batch_size;
        if size == 0 || size as usize > max_depth {
            return Err(PubSubError::InvalidDeliveryBatchSize {
                size,
                max: max_depth,
            });
        }

        let Some(sub_pattern_matched) = sub_pattern_matched else {
            return Err(PubSubError::NotAllowed {
                direction: "sub",
                topic_name: topic_name.to_string(),
                endpoint: endpoint.name().to_string(),
            });
        };

        let mut request = json!({
            "topic_name": topic_name,
            "endpoint_id": endpoint.id(),
            "is_internal": options.is_internal,
            "wrap_one_msg_in_list": options.wrap_one_msg_in_list,
            "delivery_batch_size": size,
            "sub_pattern_matched": sub_pattern_matched,
        });
        let service = match &options.wsx {
            Some(wsx) => {
                if let Some(fields) = request.as_object_mut() {
                    fields.insert("ws_channel_id".into(), json!(wsx.ws_channel_id));
                    fields.insert("pub_client_id".into(), json!(wsx.pub_client_id));
                    fields.insert("unsub_on_wsx_close".into(), json!(wsx.unsub_on_wsx_close));
                }
                EndpointType::WebSockets.subscribe_service()
            }
            None => endpoint.endpoint_type().subscribe_service(),
        };

        let response = unwrap_response(self.invoker().invoke(&service, request).await?);
        let sub_key = response
            .get("sub_key")
            .and_then(Value::as_str)
            .filter(|sub_key| !sub_key.is_empty())
            .ok_or_else(|| PubSubError::InvalidResponse {
                service: service.clone(),
                message: format!("could not subscribe to topic '{topic_name}'"),
            })?
            .to_string();

        info!(topic = %topic_name, endpoint = %endpoint.name(), sub_key = %sub_key, "Subscribed");
        Ok(sub_key)
    }

    /// Unsubscribe sub_keys, grouped by topic name.
    ///
    /// Topic names are checked before anything is removed. Delivery tasks
    /// run by this process are deleted and the on-unsubscribed hook runs;
    /// failures of either are logged.
    pub async fn unsubscribe(&self, topic_sub_keys: &HashMap<String, Vec<String>>) -> Result<()> {
        let removed = self.lock().await.unsubscribe(topic_sub_keys, self.server())?;

        for item in removed {
            let sub_key = item.sub.sub_key();
            info!(sub_key = %sub_key, topic = %item.sub.topic_name(), owned_locally = item.owned_locally, "Unsubscribed");
            if !item.owned_locally {
                continue;
            }

            let request = json!({ "sub_key": sub_key, "topic_name": item.sub.topic_name() });
            if let Err(e) = self.invoker().invoke(names::DELETE_DELIVERY_TASK, request).await {
                warn!(sub_key = %sub_key, error = %e, "Could not delete delivery task");
            }

            if let Some(hook) = &item.on_unsubscribed {
                if let Err(e) = self.invoke_subscription_hook(hook, &item.topic, &item.sub).await {
                    warn!(sub_key = %sub_key, error = %e, "On-unsubscribed hook failed");
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish to a topic, or to a service through its own topic.
    pub async fn publish(&self, name: &str, options: PublishOptions) -> Result<Published> {
        let endpoint = self.publisher_endpoint(&options).await?;

        let (topic_name, has_gd, zato_ctx) = if self.has_topic_by_name(name).await {
            (name.to_string(), options.has_gd, Value::Null)
        } else if self.invoker().has_service(name) {
            let topic_name = self.service_topic(name).await?;
            (topic_name, Some(true), json!({ "target_service_name": name }))
        } else {
            return Err(PubSubError::UnknownService(name.to_string()));
        };

        if endpoint.pub_pattern_for(&topic_name).is_none() {
            return Err(PubSubError::NotAllowed {
                direction: "pub",
                topic_name,
                endpoint: endpoint.name().to_string(),
            });
        }

        let mut request = serde_json::to_value(&options)?;
        if let Some(fields) = request.as_object_mut() {
            fields.insert("topic_name".into(), json!(topic_name));
            fields.insert("has_gd".into(), json!(has_gd));
            fields.insert("endpoint_id".into(), json!(endpoint.id()));
            fields.insert("zato_ctx".into(), zato_ctx);
        }

        let response = unwrap_response(self.invoker().invoke(names::PUBLISH, request).await?);
        self.incr_pub_counter(endpoint.id()).await;

        if let Some(msg_id) = response.get("msg_id").and_then(Value::as_str) {
            return Ok(Published::MsgId(msg_id.to_string()));
        }
        if let Some(list) = response.get("msg_id_list").and_then(Value::as_array) {
            let ids = list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            return Ok(Published::MsgIdList(ids));
        }
        Err(PubSubError::InvalidResponse {
            service: names::PUBLISH.to_string(),
            message: "no message ID returned".to_string(),
        })
    }

    async fn publisher_endpoint(&self, options: &PublishOptions) -> Result<Endpoint> {
        let state = self.lock().await;
        let registry = &state.registry;

        let endpoint = if let Some(endpoint_id) = options.endpoint_id {
            registry.endpoint_by_id(endpoint_id)?
        } else if let Some(security_id) = options.security_id {
            registry.endpoint_by_id(registry.endpoint_id_by_sec_id(security_id)?)?
        } else if let Some(ws_channel_id) = options.ws_channel_id {
            registry.endpoint_by_ws_channel_id(ws_channel_id)?
        } else {
            let name = &self.config().default_internal_endpoint_name;
            registry
                .endpoint_by_name(name)
                .map_err(|_| PubSubError::MissingEndpoint(format!("no default endpoint '{name}'")))?
        };
        Ok(endpoint.clone())
    }

    /// Topic carrying messages for a service, created on first use.
    ///
    /// The service endpoint is subscribed to it once and this process
    /// becomes the owner of that subscription.
    async fn service_topic(&self, service_name: &str) -> Result<String> {
        let topic_name = names::topic_for_service(service_name);

        if !self.has_topic_by_name(&topic_name).await {
            let mut config = self.topic_config(0, &topic_name).with_gd(true);
            config.is_internal = true;
            self.create_topic(config).await?;
            self.wait_for_topic(&topic_name).await?;
        }

        let endpoint_name = self.config().service_endpoint_name.clone();
        let endpoint = self.endpoint_by_name(&endpoint_name).await?;

        if !self.is_subscribed_to(endpoint.id(), &topic_name).await {
            let mut options = SubscribeOptions::for_endpoint(endpoint_name).with_delivery_batch_size(1);
            options.is_internal = true;
            let sub_key = self.subscribe(&topic_name, options).await?;
            self.set_config_for_service_subscription(&sub_key).await?;
        }

        Ok(topic_name)
    }

    // ------------------------------------------------------------------
    // Message access
    // ------------------------------------------------------------------

    /// Take messages waiting for a sub_key from its delivery task.
    ///
    /// Internal fields are removed unless `needs_details` is set;
    /// `needs_msg_id` keeps the message ID as `msg_id`.
    pub async fn get_messages(
        &self,
        topic_name: &str,
        sub_key: &str,
        needs_details: bool,
        needs_msg_id: bool,
    ) -> Result<Vec<Value>> {
        let is_wsx = {
            let state = self.lock().await;
            state.registry.topic_id_by_name(topic_name)?;
            state.registry.subscription(sub_key)?.is_wsx()
        };

        let Some(owner) = self.resolve_owner(sub_key, is_wsx).await else {
            info!(sub_key = %sub_key, "No delivery server for sub_key, no messages returned");
            return Ok(Vec::new());
        };

        let request = json!({
            "cluster_id": self.server().cluster_id,
            "server_name": owner.server_name,
            "server_pid": owner.server_pid,
            "sub_key": sub_key,
        });
        let response = unwrap_response(
            self.invoker()
                .invoke(names::GET_DELIVERY_MESSAGES, request)
                .await?,
        );

        let messages = match response {
            Value::Array(messages) => messages,
            Value::Null => Vec::new(),
            other => {
                return Err(PubSubError::InvalidResponse {
                    service: names::GET_DELIVERY_MESSAGES.to_string(),
                    message: format!("expected a list of messages, got {other}"),
                })
            }
        };

        Ok(messages
            .into_iter()
            .map(|msg| external_message(msg, needs_details, needs_msg_id))
            .collect())
    }

    /// Browse a sub_key's queue without consuming it.
    pub async fn read_messages(
        &self,
        topic_name: &str,
        sub_key: &str,
        has_gd: bool,
        query: ReadQuery,
    ) -> Result<Value> {
        let topic_id = self.topic_id_by_name(topic_name).await?;
        let mut request = json!({
            "cluster_id": self.server().cluster_id,
            "topic_id": topic_id,
            "sub_key": sub_key,
            "query": query.query,
            "paginate": query.paginate,
            "cur_page": query.cur_page,
        });

        let service = if has_gd {
            names::READ_MESSAGES_GD
        } else {
            let owner = self
                .resolve_owner(sub_key, false)
                .await
                .ok_or(PubSubError::MissingNonGdLocation)?;
            if let Some(fields) = request.as_object_mut() {
                fields.insert("server_name".into(), json!(owner.server_name));
                fields.insert("server_pid".into(), json!(owner.server_pid));
            }
            names::READ_MESSAGES_NON_GD
        };

        Ok(unwrap_response(self.invoker().invoke(service, request).await?))
    }

    /// Read a single message. Non-GD messages need their location.
    pub async fn read_message(
        &self,
        topic_name: &str,
        msg_id: &str,
        has_gd: bool,
        location: Option<&NonGdLocation>,
    ) -> Result<Value> {
        let mut request = Map::new();
        request.insert("msg_id".into(), json!(msg_id));
        request.insert("cluster_id".into(), json!(self.server().cluster_id));

        let service = if has_gd {
            let topic_id = self.topic_id_by_name(topic_name).await?;
            request.insert("topic_id".into(), json!(topic_id));
            names::READ_MESSAGE_GD
        } else {
            let location = location
                .filter(|location| location.is_complete())
                .ok_or(PubSubError::MissingNonGdLocation)?;
            request.insert("sub_key".into(), json!(location.sub_key));
            request.insert("server_name".into(), json!(location.server_name));
            request.insert("server_pid".into(), json!(location.server_pid));
            names::READ_MESSAGE_NON_GD
        };

        Ok(unwrap_response(
            self.invoker().invoke(service, Value::Object(request)).await?,
        ))
    }

    /// Delete a message from a sub_key's queue. Non-GD messages need
    /// the server process holding them.
    pub async fn delete_message(
        &self,
        sub_key: &str,
        msg_id: &str,
        has_gd: bool,
        location: Option<&NonGdLocation>,
    ) -> Result<Value> {
        let mut request = Map::new();
        request.insert("sub_key".into(), json!(sub_key));
        request.insert("msg_id".into(), json!(msg_id));
        request.insert("cluster_id".into(), json!(self.server().cluster_id));

        let service = if has_gd {
            names::DELETE_MESSAGE_GD
        } else {
            let location = location
                .filter(|location| !sub_key.is_empty() && location.is_complete())
                .ok_or(PubSubError::MissingNonGdLocation)?;
            request.insert("server_name".into(), json!(location.server_name));
            request.insert("server_pid".into(), json!(location.server_pid));
            names::DELETE_MESSAGE_NON_GD
        };

        Ok(unwrap_response(
            self.invoker().invoke(service, Value::Object(request)).await?,
        ))
    }

    // ------------------------------------------------------------------
    // Backlog and sync state
    // ------------------------------------------------------------------

    /// Buffer non-GD messages for the given subscribers and flag the topic.
    pub async fn store_in_ram(
        &self,
        cid: &str,
        topic_id: TopicId,
        topic_name: &str,
        sub_keys: &[String],
        messages: Vec<PubMessage>,
        source: &str,
    ) -> Result<()> {
        debug!(
            cid = %cid,
            topic = %topic_name,
            sub_keys = sub_keys.len(),
            messages = messages.len(),
            source = %source,
            "Storing non-GD messages in RAM"
        );
        self.lock()
            .await
            .store_in_ram(cid, topic_id, sub_keys, messages)?;
        Ok(())
    }

    pub async fn set_sync_has_msg(
        &self,
        topic_id: TopicId,
        is_gd: bool,
        value: bool,
        source: &str,
        gd_pub_time_max: f64,
    ) -> Result<()> {
        debug!(topic_id, is_gd, value, source = %source, "Setting sync flag");
        self.lock()
            .await
            .set_sync_has_msg(topic_id, is_gd, value, gd_pub_time_max)?;
        Ok(())
    }

    /// Re-arm a topic whose delivery tasks could not be notified. Returns
    /// the watermark now in effect.
    pub async fn after_gd_sync_error(
        &self,
        topic_id: TopicId,
        source: &str,
        pub_time_max: f64,
    ) -> Result<f64> {
        Ok(self
            .lock()
            .await
            .after_gd_sync_error(topic_id, source, pub_time_max)?)
    }

    // ------------------------------------------------------------------
    // Delivery tasks
    // ------------------------------------------------------------------

    pub async fn migrate_delivery_server(&self, request: MigrateRequest) -> Result<()> {
        info!(
            sub_key = %request.sub_key,
            new_server = %request.new_delivery_server_name,
            "Migrating delivery server"
        );
        self.invoker()
            .invoke(names::MIGRATE_DELIVERY_SERVER, serde_json::to_value(&request)?)
            .await?;
        Ok(())
    }

    /// Hand one or more messages of a sub_key to the delivery service.
    pub async fn deliver_pubsub_msg(&self, sub_key: &str, msg: Value) -> Result<Value> {
        let sub = self.lock().await.registry.subscription(sub_key)?.clone();
        let request = json!({ "msg": msg, "subscription": sub });
        Ok(self.invoker().invoke(names::DELIVER_MESSAGE, request).await?)
    }
}

fn external_message(msg: Value, needs_details: bool, needs_msg_id: bool) -> Value {
    let Value::Object(mut fields) = msg else {
        return msg;
    };

    if needs_msg_id {
        if let Some(msg_id) = fields.remove("pub_msg_id") {
            fields.insert("msg_id".into(), msg_id);
        }
    }
    if !needs_details {
        for name in SKIP_TO_EXTERNAL {
            fields.remove(*name);
        }
    }
    Value::Object(fields)
}
