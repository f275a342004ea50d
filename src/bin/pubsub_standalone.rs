//! pubsub-standalone: single-process broker
//!
//! Runs the broker core with in-process collaborators. Platform services,
//! the broker channel and the durable store all live in this process.
//!
//! ## Architecture
//! ```text
//! pubsub-standalone (single process)
//!     │
//!     ├── PubSub (registry, backlog, delivery owners)
//!     ├── Sync loop ──after-publish──→ delivery task queues
//!     ├── Broker channel (tokio broadcast) ──→ broker listener
//!     ├── Platform services (LocalServiceInvoker)
//!     └── Durable store (in memory)
//! ```
//!
//! ## Configuration
//! - PUBSUB_CONFIG: YAML config file (default: config.yaml, optional)
//! - PUBSUB__<SECTION>__<KEY>: overrides, e.g. PUBSUB__PUBSUB__SYNC_SLEEP_MS=5
//! - PUBSUB_LOG: log filter (default: info)
//! - PUBSUB_TOPICS: comma-separated topics to create at startup

use tracing::{info, warn};

use pubsub_core::config::Config;
use pubsub_core::standalone::StandaloneRuntime;
use pubsub_core::utils::bootstrap::init_tracing;

const TOPICS_ENV_VAR: &str = "PUBSUB_TOPICS";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let runtime = StandaloneRuntime::start(&config).await;

    let topics = std::env::var(TOPICS_ENV_VAR).unwrap_or_default();
    for name in topics.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let pubsub = runtime.pubsub();
        let topic = pubsub.topic_config(0, name);
        match pubsub.create_topic(topic).await {
            Ok(topic_id) => info!(topic = %name, topic_id, "Topic ready"),
            Err(e) => warn!(topic = %name, error = %e, "Could not create topic"),
        }
    }

    info!(
        server = %config.server.server_name,
        pid = config.server.server_pid,
        "pubsub-standalone started"
    );

    runtime.run().await?;

    info!("Shutdown complete");
    Ok(())
}
