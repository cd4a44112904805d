use crate::builder::FlowBuilder;
use crate::flow::{Flow, DEFAULT_START_TIMEOUT};
use crate::registry::{StepFactory, StepRegistry};
use crate::service::ServiceRegistry;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use stepcore::{
    EventBus, FlowDefinition, FlowError, LifecycleEvent, Step, StepError,
};
use tokio::sync::RwLock as AsyncRwLock;

/// Configuration for the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Upper bound for the wait on outstanding connections when starting a flow.
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Start flows declared `autostart` when they are registered.
    #[serde(default = "default_honor_autostart")]
    pub honor_autostart: bool,

    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

fn default_start_timeout_ms() -> u64 {
    DEFAULT_START_TIMEOUT.as_millis() as u64
}

fn default_honor_autostart() -> bool {
    true
}

fn default_event_buffer_size() -> usize {
    1000
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            honor_autostart: default_honor_autostart(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

/// Owns the step-type registry, the service registry and the named flows.
pub struct FlowManager {
    registry: RwLock<StepRegistry>,
    services: Arc<ServiceRegistry>,
    flows: AsyncRwLock<IndexMap<String, Arc<Flow>>>,
    event_bus: EventBus,
    config: ManagerConfig,
}

impl FlowManager {
    /// Create a new manager with default settings
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_registry(StepRegistry::new(), config)
    }

    /// Create a new manager with a pre-configured registry
    pub fn with_registry(registry: StepRegistry, config: ManagerConfig) -> Self {
        Self {
            registry: RwLock::new(registry),
            services: Arc::new(ServiceRegistry::new()),
            flows: AsyncRwLock::new(IndexMap::new()),
            event_bus: EventBus::new(config.event_buffer_size),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, StepRegistry> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, StepRegistry> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a step type
    pub fn register_step_type(&self, factory: Arc<dyn StepFactory>) {
        self.registry_write().register(factory);
    }

    pub fn unregister_step_type(&self, step_type: &str) {
        self.registry_write().unregister(step_type);
    }

    /// Direct access to the step-type registry, e.g. to register a whole library
    pub fn with_registry_mut<R>(&self, f: impl FnOnce(&mut StepRegistry) -> R) -> R {
        f(&mut self.registry_write())
    }

    pub fn has_step_type(&self, step_type: &str) -> bool {
        self.registry_read().contains(step_type)
    }

    pub fn step_types(&self) -> Vec<String> {
        self.registry_read().list_step_types()
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Build a flow against the current registries without registering it
    pub fn build_flow(&self, definition: &FlowDefinition) -> Result<Flow, FlowError> {
        let registry = self.registry_read();
        let flow = FlowBuilder::new(&registry, &self.services).build(definition)?;
        Ok(flow)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.event_bus.subscribe()
    }

    pub async fn flow(&self, name: &str) -> Option<Arc<Flow>> {
        self.flows.read().await.get(name).cloned()
    }

    pub async fn flow_names(&self) -> Vec<String> {
        self.flows.read().await.keys().cloned().collect()
    }

    /// Register a built flow under its name, starting it if it is marked autostart.
    ///
    /// The flow's start timeout is taken from the manager configuration.
    pub async fn register_flow(&self, mut flow: Flow) -> Result<Arc<Flow>, FlowError> {
        flow.set_start_timeout(Duration::from_millis(self.config.start_timeout_ms));
        let flow = Arc::new(flow);
        {
            let mut flows = self.flows.write().await;
            if flows.contains_key(flow.name()) {
                return Err(FlowError::FlowExists(flow.name().to_string()));
            }
            flows.insert(flow.name().to_string(), flow.clone());
        }
        tracing::info!("Registered flow: {}", flow.name());
        self.event_bus.emit(LifecycleEvent::registered(flow.name()));

        if flow.autostart() && self.config.honor_autostart {
            if let Err(e) = self.start_flow(&flow).await {
                self.unregister_flow(flow.name()).await?;
                return Err(e.into());
            }
        }
        Ok(flow)
    }

    /// Start a flow and report its new state.
    pub async fn start_flow(&self, flow: &Flow) -> Result<(), StepError> {
        let result = flow.start().await;
        self.event_bus
            .emit(LifecycleEvent::state_changed(flow.name(), flow.state()));
        result
    }

    pub async fn stop_flow(&self, flow: &Flow) -> Result<(), StepError> {
        let result = flow.stop().await;
        self.event_bus
            .emit(LifecycleEvent::state_changed(flow.name(), flow.state()));
        result
    }

    /// Stops (if running) and removes a flow, then forgets it.
    ///
    /// The flow is removed even when stopping it fails; the stop error is
    /// returned afterwards.
    pub async fn unregister_flow(&self, name: &str) -> Result<(), FlowError> {
        let flow = self
            .flows
            .write()
            .await
            .shift_remove(name)
            .ok_or_else(|| FlowError::FlowNotFound(name.to_string()))?;

        let stopped = if flow.state().is_running() {
            self.stop_flow(&flow).await
        } else {
            Ok(())
        };
        let removed = flow.remove().await;

        tracing::info!("Unregistered flow: {}", name);
        self.event_bus.emit(LifecycleEvent::unregistered(name));
        stopped?;
        removed?;
        Ok(())
    }

    /// Stops every running flow concurrently.
    pub async fn shutdown(&self) -> Result<(), FlowError> {
        let flows: Vec<Arc<Flow>> = self.flows.read().await.values().cloned().collect();
        let results = join_all(
            flows
                .iter()
                .filter(|flow| flow.state().is_running())
                .map(|flow| self.stop_flow(flow)),
        )
        .await;
        results
            .into_iter()
            .find_map(Result::err)
            .map_or(Ok(()), |e| Err(e.into()))
    }
}

impl Default for FlowManager {
    fn default() -> Self {
        Self::new()
    }
}
