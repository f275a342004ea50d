//! Standalone mode: the broker with in-process collaborators.
//!
//! Runs a single broker process with no external dependencies. Platform
//! services are hosted by a [`LocalServiceInvoker`], GD messages live in an
//! [`InMemoryDurableStore`] and broker messages travel over a tokio
//! broadcast channel ([`ChannelBrokerClient`]).
//!
//! # Example
//!
//! ```ignore
//! use pubsub_core::config::Config;
//! use pubsub_core::standalone::StandaloneRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let runtime = StandaloneRuntime::start(&config).await;
//!     runtime.run().await
//! }
//! ```

mod channel;
mod invoker;
mod platform;
mod runtime;
mod store;

pub use channel::{spawn_broker_listener, ChannelBrokerClient};
pub use invoker::{handler_fn, HandlerFuture, LocalServiceInvoker, ServiceHandler};
pub use runtime::StandaloneRuntime;
pub use store::InMemoryDurableStore;
