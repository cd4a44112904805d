use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{Endpoint, Endpoints};
use tokio::sync::watch;

/// Something outside of any flow that exposes endpoints (configuration, logging, ...)
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn endpoints(&self) -> &Endpoints;
}

/// A service that only carries a fixed set of endpoints.
pub struct BasicService {
    name: String,
    endpoints: Endpoints,
}

impl BasicService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: Endpoints::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.insert(endpoint);
        self
    }
}

impl Service for BasicService {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

type ServiceMap = HashMap<String, Arc<dyn Service>>;

/// Named services shared by all flows of a manager.
///
/// Lookups are synchronous; [`ServiceRegistry::watch`] hands out a receiver
/// that can wait for a service that is not registered yet.
pub struct ServiceRegistry {
    services: watch::Sender<ServiceMap>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        let (services, _) = watch::channel(ServiceMap::new());
        Self { services }
    }

    /// Registers a service, waking everyone waiting for its name.
    pub fn register(&self, service: Arc<dyn Service>) -> Option<Arc<dyn Service>> {
        let name = service.name().to_string();
        tracing::info!("Registering service: {}", name);
        let mut previous = None;
        self.services.send_modify(|services| {
            previous = services.insert(name, service);
        });
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Service>> {
        let mut removed = None;
        self.services.send_if_modified(|services| {
            removed = services.remove(name);
            removed.is_some()
        });
        removed
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ServiceMap> {
        self.services.subscribe()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits until `name` is present in the watched registry.
pub(crate) async fn wait_for_service(
    mut services: watch::Receiver<ServiceMap>,
    name: &str,
) -> Option<Arc<dyn Service>> {
    let present = services.wait_for(|services| services.contains_key(name)).await.ok()?;
    present.get(name).cloned()
}
