use crate::builder::FlowBuilder;
use crate::expression::ResolveProblem;
use crate::lifecycle::{self, Steps};
use crate::registry::{StepFactory, StepMetadata};
use crate::resolver::{EndpointScope, PendingEndpoint};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{
    DefinitionError, Endpoint, EndpointDefinition, Endpoints, FlowDefinition, JsonOptions, Step,
    StepBase, StepDefinition, StepError, StepState, FLOW_TYPE,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type FlowId = Uuid;

/// Bound on the wait for outstanding connections when a flow is started.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

type ConnectionTask = Shared<BoxFuture<'static, Result<(), ResolveProblem>>>;

/// A deferred service connection, joined before the flow may start.
pub struct OutstandingConnection {
    endpoint: String,
    service: String,
    task: ConnectionTask,
}

impl OutstandingConnection {
    /// Identifier of the step endpoint waiting for the service.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_complete(&self) -> bool {
        self.task.peek().is_some()
    }
}

/// A composite step: named child steps wired together, with its own
/// endpoints exposed to the outside.
pub struct Flow {
    base: StepBase,
    id: FlowId,
    autostart: bool,
    endpoint_definitions: IndexMap<String, EndpointDefinition>,
    steps: Steps,
    outstanding: Vec<OutstandingConnection>,
    start_timeout: Duration,
    cancel: CancellationToken,
}

impl Flow {
    /// Empty flow shell with proxy endpoints for every declared endpoint.
    pub(crate) fn shell(definition: &FlowDefinition, step_type: &str) -> Self {
        let mut base = StepBase::new(definition.name.clone(), step_type)
            .with_default_description("General step collection");
        if let Some(description) = &definition.description {
            base = base.with_description(description.clone());
        }

        for (name, endpoint) in &definition.endpoints {
            let spec = endpoint.spec().cloned().unwrap_or_default();
            base.endpoints_mut().insert(Endpoint::proxy(
                name.clone(),
                definition.name.clone(),
                &spec,
                endpoint.expression().map(str::to_string),
            ));
        }

        Self {
            base,
            id: Uuid::new_v4(),
            autostart: definition.autostart,
            endpoint_definitions: definition.endpoints.clone(),
            steps: IndexMap::new(),
            outstanding: Vec::new(),
            start_timeout: DEFAULT_START_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Instance id; every built copy of a definition gets its own.
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn autostart(&self) -> bool {
        self.autostart
    }

    pub fn description(&self) -> &str {
        self.base.description()
    }

    /// How long `start()` waits for services before giving up.
    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    pub fn set_start_timeout(&mut self, limit: Duration) {
        self.start_timeout = limit;
    }

    pub fn steps(&self) -> &Steps {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&dyn Step> {
        self.steps.get(name).map(|step| step.as_ref())
    }

    /// A child step that is itself a flow.
    pub fn nested_flow(&self, name: &str) -> Option<&Flow> {
        self.step(name)?.as_any().downcast_ref::<Flow>()
    }

    /// Steps marked inbound, in insertion order.
    pub fn inbound_steps(&self) -> Vec<&dyn Step> {
        lifecycle::partition(&self.steps).1
    }

    pub fn outstanding_connections(&self) -> &[OutstandingConnection] {
        &self.outstanding
    }

    /// Outstanding connections of this flow and of all nested flows.
    fn all_outstanding(&self) -> Vec<&OutstandingConnection> {
        let mut all: Vec<&OutstandingConnection> = self.outstanding.iter().collect();
        for step in self.steps.values() {
            if let Some(nested) = step.as_any().downcast_ref::<Flow>() {
                all.extend(nested.all_outstanding());
            }
        }
        all
    }

    /// Services that outstanding connections (nested flows included) are still waiting for.
    pub fn pending_services(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .all_outstanding()
            .into_iter()
            .filter(|c| !c.is_complete())
            .map(|c| c.service.clone())
            .collect();
        pending.sort();
        pending.dedup();
        pending
    }

    pub(crate) fn insert_step(&mut self, step: Box<dyn Step>) {
        self.steps.insert(step.name().to_string(), step);
    }

    pub(crate) fn step_mut(&mut self, name: &str) -> Option<&mut Box<dyn Step>> {
        self.steps.get_mut(name)
    }

    pub(crate) fn replace_endpoint(&mut self, name: &str, endpoint: Arc<Endpoint>) {
        tracing::debug!(
            "Flow '{}' endpoint '{}' now backed by {}",
            self.name(),
            name,
            endpoint.identifier()
        );
        self.base.endpoints_mut().replace(name, endpoint);
    }

    /// Registers a deferred connection of `source` to a service endpoint.
    ///
    /// Inside a tokio runtime the connection is driven in the background so
    /// it lands as soon as the service appears; it is joined again on start.
    /// Dropping or removing the flow cancels it.
    pub(crate) fn add_outstanding(&mut self, source: Arc<Endpoint>, pending: PendingEndpoint) {
        let service = pending.service().to_string();
        let endpoint = source.identifier();
        let token = self.cancel.child_token();
        let waiting_for = service.clone();
        let target = pending.into_future();

        let task = async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ResolveProblem::Cancelled(waiting_for)),
                target = target => match target {
                    Ok(target) => source.connect(&target).map_err(|e| ResolveProblem::ConnectFailed {
                        service: waiting_for,
                        reason: e.to_string(),
                    }),
                    Err(problem) => Err(problem),
                }
            }
        };
        let task: ConnectionTask = task.boxed().shared();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(task.clone());
        }

        self.outstanding.push(OutstandingConnection {
            endpoint,
            service,
            task,
        });
    }

    async fn await_connections(&self, limit: Duration) -> Result<(), StepError> {
        let flow = self.name().to_string();
        let joined = join_all(self.all_outstanding().into_iter().map(|connection| {
            let flow = flow.clone();
            let endpoint = connection.endpoint.clone();
            connection
                .task
                .clone()
                .map_err(move |problem| StepError::Connection {
                    flow,
                    endpoint,
                    reason: problem.to_string(),
                })
        }));

        let results = tokio::time::timeout(limit, joined)
            .await
            .map_err(|_| StepError::StartTimeout {
                flow: flow.clone(),
                timeout_ms: limit.as_millis() as u64,
                pending: self.pending_services(),
            })?;
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    /// Starts the flow, bounding the wait for outstanding connections by `limit`
    /// instead of the flow's own start timeout.
    pub async fn start_within(&self, limit: Duration) -> Result<(), StepError> {
        self.start_bounded(limit).await
    }

    async fn start_bounded(&self, limit: Duration) -> Result<(), StepError> {
        self.base.begin(StepState::Starting)?;
        tracing::info!("Starting flow '{}'", self.name());

        let result = match self.await_connections(limit).await {
            Ok(()) => lifecycle::start_steps(self.name(), &self.steps).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.base.settle(StepState::Running);
                tracing::info!("Flow '{}' is running", self.name());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Flow '{}' failed to start: {}", self.name(), e);
                lifecycle::compensate(self.name(), &self.steps).await;
                self.base.settle(StepState::Stopped);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name())
            .field("id", &self.id)
            .field("state", &self.state())
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl EndpointScope for Flow {
    fn scope_name(&self) -> &str {
        self.name()
    }

    fn step_endpoints(&self, step: &str) -> Option<&Endpoints> {
        self.steps.get(step).map(|s| s.endpoints())
    }

    fn own_endpoints(&self) -> &Endpoints {
        self.base.endpoints()
    }
}

#[async_trait]
impl Step for Flow {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StepBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn start(&self) -> Result<(), StepError> {
        self.start_bounded(self.start_timeout).await
    }

    async fn stop(&self) -> Result<(), StepError> {
        self.base.begin(StepState::Stopping)?;
        tracing::info!("Stopping flow '{}'", self.name());
        let result = lifecycle::stop_steps(self.name(), &self.steps).await;
        self.base.settle(StepState::Stopped);
        if let Err(e) = &result {
            tracing::warn!("Flow '{}' stopped with errors: {}", self.name(), e);
        }
        result
    }

    async fn remove(&self) -> Result<(), StepError> {
        self.base.begin(StepState::Removed)?;
        tracing::info!("Removing flow '{}'", self.name());
        self.cancel.cancel();
        lifecycle::remove_steps(self.name(), &self.steps).await
    }

    fn to_json_with_options(&self, options: &JsonOptions) -> serde_json::Value {
        use serde_json::Value;

        let mut json = self.base.to_json_with_options(options);

        let endpoints: serde_json::Map<String, Value> = self
            .endpoint_definitions
            .iter()
            .filter(|(_, definition)| options.include_defaults || !definition.is_default())
            .filter_map(|(name, definition)| {
                serde_json::to_value(definition)
                    .ok()
                    .map(|value| (name.clone(), value))
            })
            .collect();
        if endpoints.is_empty() {
            json.remove("endpoints");
        } else {
            json.insert("endpoints".into(), Value::Object(endpoints));
        }

        if self.autostart {
            json.insert("autostart".into(), Value::Bool(true));
        }

        let steps: serde_json::Map<String, Value> = self
            .steps
            .values()
            .map(|step| (step.name().to_string(), step.to_json_with_options(options)))
            .collect();
        json.insert("steps".into(), Value::Object(steps));

        Value::Object(json)
    }
}

/// Inline nested flows: a step of type `flow` carrying its own steps.
pub(crate) struct FlowFactory;

impl StepFactory for FlowFactory {
    fn create(
        &self,
        definition: &StepDefinition,
        builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        let nested = FlowDefinition::from_step(definition)?;
        Ok(Box::new(builder.build_nested(&nested, FLOW_TYPE)?))
    }

    fn step_type(&self) -> &str {
        FLOW_TYPE
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "General step collection".to_string(),
            category: "flow".to_string(),
            ..Default::default()
        }
    }
}

/// A loaded flow reused as a step type. Each use builds an independent copy.
pub struct FlowTemplate {
    definition: FlowDefinition,
}

impl FlowTemplate {
    pub fn new(definition: FlowDefinition) -> Self {
        Self { definition }
    }
}

impl StepFactory for FlowTemplate {
    fn create(
        &self,
        definition: &StepDefinition,
        builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        let mut copy = self.definition.clone();
        copy.name = definition.name.clone();
        copy.autostart = false;
        if definition.description.is_some() {
            copy.description = definition.description.clone();
        }
        Ok(Box::new(builder.build_nested(&copy, &self.definition.name)?))
    }

    fn step_type(&self) -> &str {
        &self.definition.name
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: self
                .definition
                .description
                .clone()
                .unwrap_or_else(|| format!("Flow '{}'", self.definition.name)),
            category: "flow".to_string(),
            ..Default::default()
        }
    }
}
