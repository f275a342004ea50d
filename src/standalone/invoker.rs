//! Service invocation within one process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info};

use crate::hooks::HookKind;
use crate::interfaces::service_invoker::Result;
use crate::interfaces::{InvokeError, RemoteInvoker, ServiceInvoker};

/// Future returned by closure-based handlers.
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

/// A named service hosted in this process.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: Value) -> Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ServiceHandler for FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync,
{
    async fn handle(&self, request: Value) -> Result<Value> {
        (self.0)(request).await
    }
}

/// Wrap a closure returning a boxed future as a service handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

struct RegisteredService {
    service_id: Option<i64>,
    handler: Arc<dyn ServiceHandler>,
    hooks: HashSet<HookKind>,
}

/// Invokes services registered in this process by name.
///
/// Also serves as the remote invoker of a single-server cluster: calls
/// addressed to this server run locally, others are unreachable.
pub struct LocalServiceInvoker {
    server_name: String,
    services: RwLock<HashMap<String, RegisteredService>>,
}

impl LocalServiceInvoker {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            services: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegisteredService>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegisteredService>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register or replace a service.
    pub fn register(
        &self,
        name: impl Into<String>,
        service_id: Option<i64>,
        handler: Arc<dyn ServiceHandler>,
    ) {
        let name = name.into();
        debug!(service = %name, ?service_id, "Registered service");
        self.write().insert(
            name,
            RegisteredService {
                service_id,
                handler,
                hooks: HashSet::new(),
            },
        );
    }

    /// Declare the hooks a registered service implements.
    pub fn set_hooks(&self, name: &str, kinds: &[HookKind]) -> bool {
        match self.write().get_mut(name) {
            Some(service) => {
                service.hooks = kinds.iter().copied().collect();
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// Drop every registered service.
    pub fn clear(&self) {
        let mut services = self.write();
        info!(count = services.len(), "Removing all services");
        services.clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[async_trait]
impl ServiceInvoker for LocalServiceInvoker {
    async fn invoke(&self, service: &str, request: Value) -> Result<Value> {
        let handler = self
            .read()
            .get(service)
            .map(|registered| Arc::clone(&registered.handler))
            .ok_or_else(|| InvokeError::NoSuchService(service.to_string()))?;

        handler.handle(request).await
    }

    fn has_service(&self, service: &str) -> bool {
        self.read().contains_key(service)
    }

    fn service_name_by_id(&self, service_id: i64) -> Option<String> {
        self.read()
            .iter()
            .find(|(_, registered)| registered.service_id == Some(service_id))
            .map(|(name, _)| name.clone())
    }

    fn implements_hook(&self, service: &str, kind: HookKind) -> bool {
        self.read()
            .get(service)
            .is_some_and(|registered| registered.hooks.contains(&kind))
    }
}

#[async_trait]
impl RemoteInvoker for LocalServiceInvoker {
    async fn invoke_server(&self, server_name: &str, service: &str, request: Value) -> Result<Value> {
        if server_name != self.server_name {
            return Err(InvokeError::Unreachable {
                server: server_name.to_string(),
                message: "not part of this process".to_string(),
            });
        }
        self.invoke(service, request).await
    }
}
