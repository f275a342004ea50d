//! Application configuration.
//!
//! Aggregates server identity, broker runtime settings and topic defaults
//! into a single Config struct that can be loaded from YAML files or
//! environment variables.

mod limits;
mod pubsub;
mod server;

pub use limits::{
    TopicDefaults, DEFAULT_DELIVERY_BATCH_SIZE, DEFAULT_DEPTH_CHECK_FREQ, DEFAULT_MAX_DEPTH_GD,
    DEFAULT_MAX_DEPTH_NON_GD, DEFAULT_PUB_BUFFER_SIZE_GD, DEFAULT_TASK_DELIVERY_INTERVAL_MS,
    DEFAULT_TASK_SYNC_INTERVAL_MS,
};
pub use pubsub::{
    PubSubConfig, DEFAULT_INTERNAL_ENDPOINT_NAME, DEFAULT_OWNER_TABLE_COLUMNS,
    DEFAULT_SERVICE_ENDPOINT_NAME,
};
pub use server::ServerIdentity;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PUBSUB_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PUBSUB";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PUBSUB_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of this server process.
    pub server: ServerIdentity,
    /// Broker runtime settings.
    pub pubsub: PubSubConfig,
    /// Defaults for new topics and subscriptions.
    pub topic_defaults: TopicDefaults,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: a fixed server identity and a fast sync loop.
    pub fn for_test() -> Self {
        Self {
            server: ServerIdentity::new(1, "server1", 1000),
            pubsub: PubSubConfig {
                sync_sleep_ms: 1,
                wait_for_topic_timeout_secs: 1,
                wait_for_topic_poll_ms: 10,
                rpc_timeout_ms: 200,
                ..Default::default()
            },
            topic_defaults: TopicDefaults::default(),
        }
    }
}
