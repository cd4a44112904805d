//! Flow construction and lifecycle
//!
//! This crate turns flow definitions into graphs of connected steps, resolves
//! endpoint expressions against sibling steps, the enclosing flow and named
//! services, and drives the ordered start/stop of a flow's children.

mod binder;
mod builder;
mod expression;
mod flow;
pub mod lifecycle;
mod loader;
mod manager;
mod registry;
mod resolver;
mod service;

pub use binder::{bind_step_endpoints, BackReference};
pub use builder::{build_flow, FlowBuilder, MAX_NESTING_DEPTH};
pub use expression::{parse, EndpointExpression, ParsedExpression, ResolveProblem, FLOW_SCOPE};
pub use flow::{Flow, FlowId, FlowTemplate, OutstandingConnection, DEFAULT_START_TIMEOUT};
pub use loader::{load_flows, load_flows_from_file, load_flows_from_str};
pub use manager::{FlowManager, ManagerConfig};
pub use registry::{PortDefinition, StepFactory, StepMetadata, StepRegistry};
pub use resolver::{resolve, EndpointScope, PendingEndpoint, Resolution};
pub use service::{BasicService, Service, ServiceRegistry};
