//! Bootstrap utilities for broker binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the PUBSUB_LOG environment variable.
///
/// Defaults to "info" level if PUBSUB_LOG is not set. Overflowed
/// messages are logged under the `pubsub_overflow` target, so
/// `PUBSUB_LOG=info,pubsub_overflow=off` silences them.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
