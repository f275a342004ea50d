//! In-process broker channel.
//!
//! Uses a tokio broadcast channel so every listener in the process sees
//! every broker message, as separate server processes would.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::interfaces::service_invoker::Result;
use crate::interfaces::{BrokerClient, BrokerMessage};
use crate::pubsub::PubSub;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// Broker client backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelBrokerClient {
    sender: broadcast::Sender<Arc<BrokerMessage>>,
}

impl ChannelBrokerClient {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// New receiver of every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BrokerMessage>> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for ChannelBrokerClient {
    async fn publish(&self, msg: BrokerMessage) -> Result<()> {
        let action = msg.action();

        // No receivers is fine for publish-only setups
        match self.sender.send(Arc::new(msg)) {
            Ok(receivers) => debug!(action, receivers, "Published broker message"),
            Err(_) => debug!(action, "Published broker message (no receivers)"),
        }
        Ok(())
    }
}

/// Apply every broker message received on `receiver` to `pubsub`.
///
/// Stops when the channel closes.
pub fn spawn_broker_listener(
    pubsub: PubSub,
    mut receiver: broadcast::Receiver<Arc<BrokerMessage>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Broker listener started");
        loop {
            match receiver.recv().await {
                Ok(msg) => {
                    let action = msg.action();
                    if let Err(e) = pubsub.on_broker_msg(Arc::unwrap_or_clone(msg)).await {
                        warn!(action, error = %e, "Could not apply broker message");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!(skipped = n, "Broker listener lagged, skipped messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Broker channel closed, stopping listener");
                    break;
                }
            }
        }
    })
}
