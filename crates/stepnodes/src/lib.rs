//! Standard step library
//!
//! Built-in step types that can be used in any flow definition.

mod debug;
mod inbox;
mod passthrough;
mod time;

pub use debug::{LogFactory, LogStep, LOG};
pub use passthrough::{PassthroughFactory, PassthroughStep, PASSTHROUGH};
pub use time::{DelayFactory, DelayStep, DELAY};

use flowgraph::StepRegistry;
use std::sync::Arc;

/// Register all standard steps with a registry
pub fn register_all(registry: &mut StepRegistry) {
    registry.register(Arc::new(PassthroughFactory));
    registry.register(Arc::new(DelayFactory));
    registry.register(Arc::new(LogFactory));
}
