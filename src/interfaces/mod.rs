//! Abstract interfaces for the broker's collaborators.
//!
//! These traits define the contracts for:
//! - Service invocation (named request/response operations, hooks)
//! - Remote servers (owner recovery calls)
//! - The durable store (guaranteed-delivery messages, delivery servers)
//! - The inter-process broker channel (broadcast notifications)

pub mod broker_client;
pub mod durable_store;
pub mod remote_invoker;
pub mod service_invoker;

pub use broker_client::{BrokerClient, BrokerMessage};
pub use durable_store::{DeliveryServerRecord, DurableStore, StoreError, StoredMessage};
pub use remote_invoker::RemoteInvoker;
pub use service_invoker::{InvokeError, ServiceInvoker};
