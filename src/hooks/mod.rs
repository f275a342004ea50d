//! Topic hooks.
//!
//! A topic may name a backing service implementing any of five hooks.
//! Invokers are resolved once, when the topic is created or edited, and
//! cached on the topic as [`HookBindings`]. A hot deploy of the backing
//! service triggers an explicit re-resolution of the affected topics.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::interfaces::{InvokeError, ServiceInvoker};

/// Result type for hook operations.
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors raised by hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Invalid hook action '{action}' for message {msg_id}")]
    InvalidAction { action: String, msg_id: String },

    #[error("Hook service '{service}' does not implement {kind}")]
    NotImplemented { service: String, kind: HookKind },

    #[error("Hook service '{service}' failed")]
    Invocation {
        service: String,
        #[source]
        source: InvokeError,
    },
}

/// Lifecycle events a topic's hook service may handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    BeforePublish,
    BeforeDelivery,
    OnSubscribed,
    OnUnsubscribed,
    OnOutgoingInvoke,
}

impl HookKind {
    pub const ALL: [HookKind; 5] = [
        HookKind::BeforePublish,
        HookKind::BeforeDelivery,
        HookKind::OnSubscribed,
        HookKind::OnUnsubscribed,
        HookKind::OnOutgoingInvoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::BeforePublish => "before_publish",
            HookKind::BeforeDelivery => "before_delivery",
            HookKind::OnSubscribed => "on_subscribed",
            HookKind::OnUnsubscribed => "on_unsubscribed",
            HookKind::OnOutgoingInvoke => "on_outgoing_invoke",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a before-delivery or before-publish hook decided for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    #[default]
    Deliver,
    Skip,
    #[serde(alias = "delete")]
    Drop,
}

impl FromStr for HookAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deliver" => Ok(HookAction::Deliver),
            "skip" => Ok(HookAction::Skip),
            "drop" | "delete" => Ok(HookAction::Drop),
            other => Err(other.to_string()),
        }
    }
}

/// A resolved hook: the service to call and the event it handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvoker {
    pub service_name: String,
    pub kind: HookKind,
}

impl HookInvoker {
    /// Call the hook. `payload` fields are merged into the request next to
    /// `hook_type` and `topic`.
    pub async fn invoke(
        &self,
        invoker: &dyn ServiceInvoker,
        topic: &Value,
        payload: Value,
    ) -> Result<Value> {
        let mut request = json!({
            "hook_type": self.kind,
            "topic": topic,
        });
        if let (Some(target), Value::Object(fields)) = (request.as_object_mut(), payload) {
            target.extend(fields);
        }

        debug!(service = %self.service_name, hook = %self.kind, "Invoking hook");

        invoker
            .invoke(&self.service_name, request)
            .await
            .map_err(|source| HookError::Invocation {
                service: self.service_name.clone(),
                source,
            })
    }
}

/// Hook invokers cached on a topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookBindings {
    pub service_name: Option<String>,
    pub before_publish: Option<HookInvoker>,
    pub before_delivery: Option<HookInvoker>,
    pub on_subscribed: Option<HookInvoker>,
    pub on_unsubscribed: Option<HookInvoker>,
    pub on_outgoing_invoke: Option<HookInvoker>,
}

impl HookBindings {
    /// No hook service configured.
    pub fn none() -> Self {
        Self::default()
    }

    /// Derive invokers for every hook the service implements.
    pub fn resolve(service_name: Option<&str>, invoker: &dyn ServiceInvoker) -> Self {
        let Some(service_name) = service_name else {
            return Self::none();
        };

        let resolve_one = |kind: HookKind| {
            invoker
                .implements_hook(service_name, kind)
                .then(|| HookInvoker {
                    service_name: service_name.to_string(),
                    kind,
                })
        };

        Self {
            service_name: Some(service_name.to_string()),
            before_publish: resolve_one(HookKind::BeforePublish),
            before_delivery: resolve_one(HookKind::BeforeDelivery),
            on_subscribed: resolve_one(HookKind::OnSubscribed),
            on_unsubscribed: resolve_one(HookKind::OnUnsubscribed),
            on_outgoing_invoke: resolve_one(HookKind::OnOutgoingInvoke),
        }
    }

    pub fn get(&self, kind: HookKind) -> Option<&HookInvoker> {
        match kind {
            HookKind::BeforePublish => self.before_publish.as_ref(),
            HookKind::BeforeDelivery => self.before_delivery.as_ref(),
            HookKind::OnSubscribed => self.on_subscribed.as_ref(),
            HookKind::OnUnsubscribed => self.on_unsubscribed.as_ref(),
            HookKind::OnOutgoingInvoke => self.on_outgoing_invoke.as_ref(),
        }
    }
}

/// Messages of a batch sorted by the before-delivery hook's decision.
#[derive(Debug, Default)]
pub struct DeliveryClassification {
    pub deliver: Vec<Value>,
    pub skip: Vec<Value>,
    pub drop: Vec<Value>,
    /// Messages the hook could not classify, with the reason.
    pub failed: Vec<(Value, HookError)>,
}

impl DeliveryClassification {
    /// Everything goes to `deliver`.
    pub fn deliver_all(batch: Vec<Value>) -> Self {
        Self {
            deliver: batch,
            ..Default::default()
        }
    }

    fn push(&mut self, action: HookAction, msg: Value) {
        match action {
            HookAction::Deliver => self.deliver.push(msg),
            HookAction::Skip => self.skip.push(msg),
            HookAction::Drop => self.drop.push(msg),
        }
    }
}

/// Read the action out of a hook response. A missing action means deliver.
pub fn parse_hook_action(response: &Value, msg: &Value) -> Result<HookAction> {
    match response.get("hook_action") {
        None | Some(Value::Null) => Ok(HookAction::Deliver),
        Some(Value::String(action)) => {
            action
                .parse()
                .map_err(|action| HookError::InvalidAction {
                    action,
                    msg_id: msg_id_of(msg),
                })
        }
        Some(other) => Err(HookError::InvalidAction {
            action: other.to_string(),
            msg_id: msg_id_of(msg),
        }),
    }
}

fn msg_id_of(msg: &Value) -> String {
    msg.get("pub_msg_id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

/// Run a before-delivery hook for each message of a batch.
///
/// A failure classifying one message is recorded for that message and
/// the rest of the batch is still processed.
pub async fn classify_before_delivery(
    hook: &HookInvoker,
    invoker: &dyn ServiceInvoker,
    topic: &Value,
    batch: Vec<Value>,
) -> DeliveryClassification {
    let mut out = DeliveryClassification::default();

    for msg in batch {
        let action = match hook.invoke(invoker, topic, json!({ "msg": &msg })).await {
            Ok(response) => parse_hook_action(&response, &msg),
            Err(e) => Err(e),
        };
        match action {
            Ok(action) => out.push(action, msg),
            Err(e) => out.failed.push((msg, e)),
        }
    }

    out
}
