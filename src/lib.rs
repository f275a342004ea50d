//! pubsub-core - runtime core of a multi-process publish/subscribe broker
//!
//! Each broker process keeps a catalog of topics, subscriptions and
//! endpoints, buffers non-guaranteed-delivery messages in RAM per
//! subscriber, tracks which server process runs each subscriber's
//! delivery task and periodically notifies those tasks of new messages.
//!
//! Persistence, service invocation and the inter-process channel are
//! collaborators behind the traits in [`interfaces`]; [`standalone`]
//! provides in-process implementations of all of them.

pub mod backlog;
pub mod config;
pub mod hooks;
pub mod interfaces;
pub mod model;
pub mod pubsub;
pub mod registry;
pub mod router;
#[cfg(feature = "standalone")]
pub mod standalone;
pub mod sync;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
