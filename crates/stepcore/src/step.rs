use crate::{Endpoint, Endpoints, StepDefinition, StepError, StepState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;

/// Controls what `to_json_with_options` emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonOptions {
    #[serde(default)]
    pub include_name: bool,
    #[serde(default)]
    pub include_runtime_info: bool,
    #[serde(default)]
    pub include_defaults: bool,
}

impl JsonOptions {
    pub fn all() -> Self {
        Self {
            include_name: true,
            include_runtime_info: true,
            include_defaults: true,
        }
    }
}

/// Core trait implemented by every unit a flow can hold, including flows themselves.
///
/// Implementors hold a [`StepBase`] and usually only override the `on_*` hooks;
/// the default `start`/`stop`/`remove` drive the shared state machine around them.
#[async_trait]
pub trait Step: Send + Sync {
    fn base(&self) -> &StepBase;

    fn base_mut(&mut self) -> &mut StepBase;

    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Registered type name (e.g. "passthrough", "flow")
    fn step_type(&self) -> &str {
        self.base().step_type()
    }

    fn state(&self) -> StepState {
        self.base().state()
    }

    fn is_inbound(&self) -> bool {
        self.base().is_inbound()
    }

    fn set_inbound(&mut self, inbound: bool) {
        self.base_mut().set_inbound(inbound);
    }

    fn endpoints(&self) -> &Endpoints {
        self.base().endpoints()
    }

    fn endpoints_mut(&mut self) -> &mut Endpoints {
        self.base_mut().endpoints_mut()
    }

    fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints().get(name)
    }

    /// Optional: acquire resources while `starting`
    async fn on_start(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Optional: release resources while `stopping`
    async fn on_stop(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Optional: final cleanup when removed
    async fn on_remove(&self) -> Result<(), StepError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), StepError> {
        let base = self.base();
        base.begin(StepState::Starting)?;
        match self.on_start().await {
            Ok(()) => {
                base.settle(StepState::Running);
                Ok(())
            }
            Err(e) => {
                base.settle(StepState::Stopped);
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<(), StepError> {
        let base = self.base();
        base.begin(StepState::Stopping)?;
        let result = self.on_stop().await;
        base.settle(StepState::Stopped);
        result
    }

    async fn remove(&self) -> Result<(), StepError> {
        self.base().begin(StepState::Removed)?;
        self.on_remove().await
    }

    fn to_json_with_options(&self, options: &JsonOptions) -> serde_json::Value {
        serde_json::Value::Object(self.base().to_json_with_options(options))
    }
}

/// State shared by all step implementations: identity, endpoints and the
/// lifecycle state cell.
#[derive(Debug)]
pub struct StepBase {
    name: String,
    step_type: String,
    description: Option<String>,
    default_description: String,
    inbound: bool,
    config: serde_json::Map<String, serde_json::Value>,
    endpoints: Endpoints,
    state: watch::Sender<StepState>,
}

impl StepBase {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        let (state, _) = watch::channel(StepState::Stopped);
        Self {
            name: name.into(),
            step_type: step_type.into(),
            description: None,
            default_description: String::new(),
            inbound: false,
            config: serde_json::Map::new(),
            endpoints: Endpoints::new(),
            state,
        }
    }

    /// Takes name, description, inbound flag and configuration from a definition.
    pub fn from_definition(definition: &StepDefinition, step_type: impl Into<String>) -> Self {
        let mut base = Self::new(definition.name.clone(), step_type);
        base.description = definition.description.clone();
        base.inbound = definition.inbound;
        base.config = definition.config.clone();
        base
    }

    pub fn with_default_description(mut self, description: impl Into<String>) -> Self {
        self.default_description = description.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.insert(endpoint);
        self
    }

    pub fn with_inbound(mut self, inbound: bool) -> Self {
        self.inbound = inbound;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(&self.default_description)
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    pub fn set_inbound(&mut self, inbound: bool) {
        self.inbound = inbound;
    }

    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn endpoints_mut(&mut self) -> &mut Endpoints {
        &mut self.endpoints
    }

    pub fn state(&self) -> StepState {
        *self.state.borrow()
    }

    /// Watch the lifecycle state of this step.
    pub fn subscribe(&self) -> watch::Receiver<StepState> {
        self.state.subscribe()
    }

    /// Enters a transitional (or the removed) state, checking the state machine.
    ///
    /// `Starting` and `Removed` require `Stopped`; `Stopping` requires `Running`.
    /// On rejection the current state is left untouched.
    pub fn begin(&self, target: StepState) -> Result<(), StepError> {
        let required = match target {
            StepState::Starting | StepState::Removed => StepState::Stopped,
            StepState::Stopping => StepState::Running,
            StepState::Stopped | StepState::Running => {
                self.settle(target);
                return Ok(());
            }
        };

        let mut observed = required;
        let changed = self.state.send_if_modified(|state| {
            observed = *state;
            if *state == required {
                *state = target;
                true
            } else {
                false
            }
        });

        if changed {
            tracing::debug!(step = %self.name, state = %target, "state changed");
            return Ok(());
        }

        let step = self.name.clone();
        Err(match (target, observed) {
            (StepState::Removed, StepState::Removed) => StepError::AlreadyRemoved { step },
            (StepState::Stopping, state) => StepError::NotRunning { step, state },
            (_, state) => StepError::NotStopped { step, state },
        })
    }

    /// Unconditionally sets the state, used to finish a transition.
    pub fn settle(&self, state: StepState) {
        self.state.send_replace(state);
        tracing::debug!(step = %self.name, state = %state, "state changed");
    }

    pub fn to_json_with_options(&self, options: &JsonOptions) -> serde_json::Map<String, serde_json::Value> {
        use serde_json::Value;

        let mut json = serde_json::Map::new();
        json.insert("type".into(), Value::String(self.step_type.clone()));

        if options.include_name {
            json.insert("name".into(), Value::String(self.name.clone()));
        }

        match &self.description {
            Some(description) => {
                json.insert("description".into(), Value::String(description.clone()));
            }
            None if options.include_defaults && !self.default_description.is_empty() => {
                json.insert(
                    "description".into(),
                    Value::String(self.default_description.clone()),
                );
            }
            None => {}
        }

        if options.include_runtime_info {
            json.insert("state".into(), Value::String(self.state().to_string()));
        }

        if self.inbound {
            json.insert("inbound".into(), Value::Bool(true));
        }

        let endpoints: serde_json::Map<String, Value> = self
            .endpoints
            .iter()
            .filter(|(_, endpoint)| {
                options.include_defaults
                    || !endpoint.is_default()
                    || endpoint.target_expression().is_some()
            })
            .map(|(name, endpoint)| (name.clone(), endpoint.to_json()))
            .collect();
        if !endpoints.is_empty() {
            json.insert("endpoints".into(), Value::Object(endpoints));
        }

        for (key, value) in &self.config {
            json.entry(key.clone()).or_insert_with(|| value.clone());
        }

        json
    }
}
