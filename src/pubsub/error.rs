//! Errors raised by the public façade.

use crate::hooks::HookError;
use crate::interfaces::{InvokeError, StoreError};
use crate::registry::RegistryError;

/// Result type for façade operations.
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Errors returned to callers of [`super::PubSub`].
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid topic name '{0}'")]
    InvalidTopicName(String),

    #[error("No such topic or service '{0}'")]
    UnknownService(String),

    #[error("Missing endpoint identity: {0}")]
    MissingEndpoint(String),

    #[error("No {direction} pattern matched topic '{topic_name}' for endpoint '{endpoint}'")]
    NotAllowed {
        direction: &'static str,
        topic_name: String,
        endpoint: String,
    },

    #[error("Invalid delivery batch size {size}, must be between 1 and {max}")]
    InvalidDeliveryBatchSize { size: u32, max: usize },

    #[error("No such topic '{topic_name}' after {timeout_secs}s")]
    TopicWaitTimeout { topic_name: String, timeout_secs: u64 },

    #[error("All of sub_key, server_name and server_pid are required for non-GD messages")]
    MissingNonGdLocation,

    #[error("Invalid response from '{service}': {message}")]
    InvalidResponse { service: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PubSubError {
    /// Whether the error only says that something does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PubSubError::Registry(_) | PubSubError::UnknownService(_))
    }
}
