use crate::StepState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Flow already registered: {0}")]
    FlowExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle and execution failures of a single step or flow.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("Step '{step}' is not stopped (state: {state})")]
    NotStopped { step: String, state: StepState },

    #[error("Step '{step}' is not running (state: {state})")]
    NotRunning { step: String, state: StepState },

    #[error("Step '{step}' has already been removed")]
    AlreadyRemoved { step: String },

    #[error("Step '{step}' failed to start: {reason}")]
    StartFailed { step: String, reason: String },

    #[error("Step '{step}' failed to stop: {reason}")]
    StopFailed { step: String, reason: String },

    #[error("Connection of '{endpoint}' in flow '{flow}' failed: {reason}")]
    Connection {
        flow: String,
        endpoint: String,
        reason: String,
    },

    #[error("Flow '{flow}' did not start within {timeout_ms}ms (pending: {})", .pending.join(", "))]
    StartTimeout {
        flow: String,
        timeout_ms: u64,
        pending: Vec<String>,
    },

    #[error("Step '{step}' in flow '{flow}': {source}")]
    Child {
        flow: String,
        step: String,
        #[source]
        source: Box<StepError>,
    },
}

impl StepError {
    /// Wraps an error raised by a child step with the name of the enclosing flow.
    pub fn in_flow(self, flow: &str, step: &str) -> Self {
        StepError::Child {
            flow: flow.to_string(),
            step: step.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error below any number of `Child` wrappers.
    pub fn root(&self) -> &StepError {
        match self {
            StepError::Child { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Construction-time errors. None of these are recoverable without fixing the definition.
#[derive(Error, Debug, Clone)]
pub enum DefinitionError {
    #[error("Empty flow definition")]
    Empty,

    #[error("The flow '{flow}' has no steps")]
    NoSteps { flow: String },

    #[error("The 'steps' are empty in the flow '{flow}'")]
    EmptySteps { flow: String },

    #[error("The step '{step}' in the flow '{flow}' has no type")]
    MissingStepType { flow: String, step: String },

    #[error("The step-type '{step_type}' of step '{step}' in the flow '{flow}' is not registered")]
    UnknownStepType {
        flow: String,
        step: String,
        step_type: String,
    },

    #[error("The inbound step '{step}' does not exist in the flow '{flow}'")]
    UnknownInboundStep { flow: String, step: String },

    #[error("Invalid configuration for step '{step}': {reason}")]
    InvalidConfig { step: String, reason: String },

    #[error("Endpoint '{endpoint}' of step '{step}' in the flow '{flow}' cannot be bound to '{expression}': {reason}")]
    UnresolvedTarget {
        flow: String,
        step: String,
        endpoint: String,
        expression: String,
        reason: String,
    },

    #[error("Endpoint '{endpoint}' of the flow '{flow}' cannot be resolved from '{expression}': {reason}")]
    UnresolvedProxy {
        flow: String,
        endpoint: String,
        expression: String,
        reason: String,
    },

    #[error("Endpoint '{endpoint}' of the flow '{flow}' has no target and is not marked default")]
    DanglingProxy { flow: String, endpoint: String },

    #[error("Flows nested deeper than {depth} levels in '{flow}', is a flow using itself as a step type?")]
    NestingTooDeep { flow: String, depth: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Endpoint '{endpoint}' of '{owner}' is a flow proxy and must first be connected with a step in the flow")]
    Proxy { owner: String, endpoint: String },

    #[error("Cannot connect '{from}' to '{to}': both endpoints are '{direction}'")]
    DirectionMismatch {
        from: String,
        to: String,
        direction: String,
    },

    #[error("Cannot connect '{from}' to '{to}': both endpoints are '{mode}'")]
    ModeMismatch { from: String, to: String, mode: String },

    #[error("Endpoint '{0}' is not connected")]
    NotConnected(String),

    #[error("Endpoint '{0}' cannot send, it is an 'in' endpoint")]
    NotSending(String),

    #[error("Endpoint '{0}' has no receiver")]
    NotReceiving(String),
}
