//! Service invocation interface.

use async_trait::async_trait;
use serde_json::Value;

use crate::hooks::HookKind;

/// Result type for invocation.
pub type Result<T> = std::result::Result<T, InvokeError>;

/// Errors raised by service or remote server invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("No such service: {0}")]
    NoSuchService(String),

    #[error("Service '{service}' failed: {message}")]
    Failed { service: String, message: String },

    #[error("Server '{server}' unreachable: {message}")]
    Unreachable { server: String, message: String },

    #[error("Timed out invoking '{0}'")]
    Timeout(String),

    #[error("Broker channel closed")]
    ChannelClosed,

    #[error("Invalid response from '{service}': {message}")]
    InvalidResponse { service: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invokes named operations hosted by the platform.
///
/// Used for persistence of topics and subscriptions, message publication,
/// delivery task lifecycle and hook execution.
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    /// Invoke a service and wait for its response.
    async fn invoke(&self, service: &str, request: Value) -> Result<Value>;

    /// Whether a service with this name is deployed.
    fn has_service(&self, service: &str) -> bool;

    /// Name of a deployed service by its ID.
    fn service_name_by_id(&self, service_id: i64) -> Option<String>;

    /// Whether a service implements the given hook.
    fn implements_hook(&self, service: &str, kind: HookKind) -> bool;
}
