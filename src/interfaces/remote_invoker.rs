//! Calls to other servers in the cluster.

use async_trait::async_trait;
use serde_json::Value;

use super::service_invoker::Result;

/// Invokes a service on a named server.
///
/// Only used for best-effort lookups; callers bound every call with
/// their own timeout and treat failures as "not found".
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke_server(&self, server_name: &str, service: &str, request: Value)
        -> Result<Value>;
}
