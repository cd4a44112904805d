//! Core abstractions for flow composition
//!
//! Steps, endpoints, lifecycle states and the declarative definitions that
//! the graph builder consumes. This crate has no knowledge of how flows are
//! assembled.

mod definition;
mod endpoint;
mod error;
pub mod events;
mod state;
mod step;

pub use definition::{
    parse_flows, EndpointDeclaration, EndpointDefinition, FlowDefinition, FlowDefinitions,
    StepDefinition, FLOW_TYPE,
};
pub use endpoint::{Direction, Endpoint, EndpointSpec, Endpoints, Message, Mode};
pub use error::{DefinitionError, EndpointError, FlowError, StepError};
pub use events::*;
pub use state::StepState;
pub use step::{JsonOptions, Step, StepBase};
