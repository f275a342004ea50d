//! Broker data model.
//!
//! Topics, subscriptions, endpoints, delivery owner records and the
//! messages that pass through the in-RAM backlog. These are plain data;
//! all mutation happens through [`crate::pubsub::PubSub`] under the broker
//! lock.

mod endpoint;
mod message;
mod owner;
mod subscription;
mod topic;

pub use endpoint::{topic_matches, Endpoint, EndpointConfig, EndpointType};
pub use message::{PubMessage, QueuedMessage, SKIP_TO_EXTERNAL};
pub use owner::{DeliveryOwner, DeliveryOwnerConfig, WsxInfo};
pub use subscription::{Subscription, SubscriptionConfig, SubscriptionUpdate};
pub use topic::{OnNoSubsPub, Topic, TopicConfig};

/// Numeric topic identifier.
pub type TopicId = i64;
/// Numeric endpoint identifier.
pub type EndpointId = i64;
/// Numeric cluster identifier.
pub type ClusterId = i64;
