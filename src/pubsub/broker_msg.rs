//! Applying broker channel messages to local state.

use tracing::{debug, info};

use super::{PubSub, Result};
use crate::interfaces::BrokerMessage;

impl PubSub {
    /// Apply a message broadcast by any broker process, this one included.
    ///
    /// Subscriptions arriving here are only added to the catalog; their
    /// on-subscribed hook already ran where the subscription was created.
    pub async fn on_broker_msg(&self, msg: BrokerMessage) -> Result<()> {
        debug!(action = msg.action(), "Received broker message");

        match msg {
            BrokerMessage::SubKeyServerSet(config) => self.set_sub_key_server(config).await?,
            BrokerMessage::WsxSubKeyServerRemove { sub_key_list } => {
                self.remove_ws_sub_key_server(&sub_key_list).await;
            }
            BrokerMessage::SubscriptionCreate(config) => {
                self.create_subscription_object(config).await?;
            }
            BrokerMessage::SubscriptionEdit { sub_key, update } => {
                self.edit_subscription(&sub_key, update).await?
            }
            BrokerMessage::SubscriptionDelete { topic_sub_keys } => {
                self.unsubscribe(&topic_sub_keys).await?
            }
            BrokerMessage::TopicCreate(config) => self.create_topic_object(config).await,
            BrokerMessage::TopicEdit { old_name, config } => {
                self.edit_topic(&old_name, config).await?
            }
            BrokerMessage::TopicDelete { id } => {
                self.delete_topic(id).await?;
            }
            BrokerMessage::EndpointCreate(config) => self.create_endpoint(config).await,
            BrokerMessage::EndpointEdit(config) => self.edit_endpoint(config).await,
            BrokerMessage::EndpointDelete { id } => {
                self.delete_endpoint(id).await;
            }
            BrokerMessage::HotDeployCreateService { services_deployed } => {
                let refreshed = self.refresh_hooks(&services_deployed).await;
                info!(refreshed, "Refreshed topic hooks after hot deploy");
            }
        }
        Ok(())
    }
}
