//! The method table: services keyed by namespace, each with call and
//! subscription callbacks keyed by lower-camel-cased method name.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::callback::{CallContext, Callback};
use crate::constants::{SERVICE_METHOD_SEPARATOR, SERVICE_VERSION};
use crate::error::{RegistryError, ToJsonRpcError};
use crate::notifier::Subscription;
use crate::params::FromParams;

/// Lower-case the first character: `BlockNumber` becomes `blockNumber`.
pub fn format_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collects the methods of one service before registration.
#[derive(Debug, Default, Clone)]
pub struct ServiceBuilder {
    callbacks: HashMap<String, Callback>,
    subscriptions: HashMap<String, Callback>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prepared callback; subscription callbacks land in the subscription table.
    pub fn callback(mut self, name: &str, callback: Callback) -> Self {
        let name = format_name(name);
        if callback.is_subscription() {
            self.subscriptions.insert(name, callback);
        } else {
            self.callbacks.insert(name, callback);
        }
        self
    }

    /// Register a fallible method
    pub fn method<P, R, E, F, Fut>(self, name: &str, f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        E: ToJsonRpcError + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.callback(name, Callback::method(f))
    }

    /// Register a method that always succeeds
    pub fn infallible<P, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.callback(name, Callback::infallible(f))
    }

    /// Register a fallible method that takes no call context
    pub fn function<P, R, E, F, Fut>(self, name: &str, f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        E: ToJsonRpcError + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.callback(name, Callback::function(f))
    }

    /// Register a subscription, reachable as `<namespace>_subscribe` with `name` as first argument
    pub fn subscription<P, E, F, Fut>(self, name: &str, f: F) -> Self
    where
        P: FromParams,
        E: ToJsonRpcError + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Subscription, E>> + Send + 'static,
    {
        self.callback(name, Callback::subscription(f))
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.subscriptions.is_empty()
    }
}

/// An object exposing a set of RPC methods.
pub trait RpcService: Send + Sync + 'static {
    fn methods(self: Arc<Self>) -> ServiceBuilder;
}

#[derive(Debug, Default)]
struct Service {
    callbacks: HashMap<String, Arc<Callback>>,
    subscriptions: HashMap<String, Arc<Callback>>,
}

/// Registered services, shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the methods in `service` under `name`. Registering a name
    /// again merges the method sets; a repeated method name replaces the old one.
    pub fn register_name(&self, name: &str, service: ServiceBuilder) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if service.is_empty() {
            return Err(RegistryError::NoMethods(name.to_string()));
        }
        let mut services = self.services.write();
        let entry = services.entry(name.to_string()).or_default();
        for (method, cb) in service.callbacks {
            entry.callbacks.insert(method, Arc::new(cb));
        }
        for (method, cb) in service.subscriptions {
            entry.subscriptions.insert(method, Arc::new(cb));
        }
        debug!(
            service = name,
            methods = entry.callbacks.len(),
            subscriptions = entry.subscriptions.len(),
            "Registered RPC service"
        );
        Ok(())
    }

    pub fn register_service<S: RpcService>(&self, name: &str, service: Arc<S>) -> Result<(), RegistryError> {
        self.register_name(name, service.methods())
    }

    /// Register a single callback
    pub fn register(&self, namespace: &str, method: &str, callback: Callback) -> Result<(), RegistryError> {
        self.register_name(namespace, ServiceBuilder::new().callback(method, callback))
    }

    /// Look up `namespace_method`
    pub fn callback(&self, method: &str) -> Option<Arc<Callback>> {
        let (namespace, name) = method.split_once(SERVICE_METHOD_SEPARATOR)?;
        self.services
            .read()
            .get(namespace)
            .and_then(|svc| svc.callbacks.get(name).cloned())
    }

    pub fn subscription(&self, namespace: &str, name: &str) -> Option<Arc<Callback>> {
        self.services
            .read()
            .get(namespace)
            .and_then(|svc| svc.subscriptions.get(name).cloned())
    }

    /// Every registered service with its version
    pub fn modules(&self) -> HashMap<String, String> {
        self.services
            .read()
            .keys()
            .map(|name| (name.clone(), SERVICE_VERSION.to_string()))
            .collect()
    }
}
