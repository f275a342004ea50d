//! Invoking topic hooks from the façade.
//!
//! The invoker and topic context are read under the lock; the hook itself
//! runs after the lock is released.

use serde_json::{json, Value};
use tracing::debug;

use super::{PubSub, Result};
use crate::hooks::{
    classify_before_delivery, parse_hook_action, DeliveryClassification, HookAction, HookError,
    HookInvoker, HookKind,
};
use crate::model::{Subscription, Topic};

/// Topic fields handed to hooks.
pub(crate) fn topic_context(topic: &Topic) -> Value {
    json!({
        "id": topic.id(),
        "name": topic.name(),
        "has_gd": topic.has_gd(),
        "is_internal": topic.config.is_internal,
        "hook_service_name": topic.config.hook_service_name,
    })
}

impl PubSub {
    /// Cached invoker of a topic's hook, with the topic context to pass it.
    pub async fn topic_hook(
        &self,
        topic_name: &str,
        kind: HookKind,
    ) -> Result<(Option<HookInvoker>, Value)> {
        let state = self.lock().await;
        let topic = state.registry.topic_by_name(topic_name)?;
        Ok((topic.hooks.get(kind).cloned(), topic_context(topic)))
    }

    /// Ask the topic's before-publish hook what to do with a message.
    /// Topics without the hook accept everything.
    pub async fn before_publish(&self, topic_name: &str, msg: &Value) -> Result<HookAction> {
        let (hook, topic) = self.topic_hook(topic_name, HookKind::BeforePublish).await?;
        let Some(hook) = hook else {
            return Ok(HookAction::Deliver);
        };

        let response = hook
            .invoke(self.invoker().as_ref(), &topic, json!({ "msg": msg }))
            .await?;
        Ok(parse_hook_action(&response, msg)?)
    }

    /// Split a delivery batch by the topic's before-delivery hook.
    pub async fn before_delivery(
        &self,
        topic_name: &str,
        batch: Vec<Value>,
    ) -> Result<DeliveryClassification> {
        let (hook, topic) = self.topic_hook(topic_name, HookKind::BeforeDelivery).await?;
        let Some(hook) = hook else {
            return Ok(DeliveryClassification::deliver_all(batch));
        };

        Ok(classify_before_delivery(&hook, self.invoker().as_ref(), &topic, batch).await)
    }

    /// Run the topic's outgoing-invoke hook.
    pub async fn on_outgoing_invoke(&self, topic_name: &str, payload: Value) -> Result<Value> {
        let (hook, topic) = self.topic_hook(topic_name, HookKind::OnOutgoingInvoke).await?;
        let Some(hook) = hook else {
            let service = self
                .topic_by_name(topic_name)
                .await?
                .config
                .hook_service_name
                .unwrap_or_default();
            return Err(HookError::NotImplemented {
                service,
                kind: HookKind::OnOutgoingInvoke,
            }
            .into());
        };

        Ok(hook.invoke(self.invoker().as_ref(), &topic, payload).await?)
    }

    pub(crate) async fn invoke_subscription_hook(
        &self,
        hook: &HookInvoker,
        topic: &Value,
        sub: &Subscription,
    ) -> Result<()> {
        debug!(sub_key = %sub.sub_key(), hook = %hook.kind, "Invoking subscription hook");
        hook.invoke(self.invoker().as_ref(), topic, json!({ "sub": sub }))
            .await?;
        Ok(())
    }

    /// Re-resolve cached hook invokers after services were deployed.
    pub async fn refresh_hooks(&self, services_deployed: &[i64]) -> usize {
        self.lock()
            .await
            .refresh_hooks(services_deployed, self.invoker().as_ref())
    }
}
