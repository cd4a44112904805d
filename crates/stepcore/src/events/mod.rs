mod base;

pub use base::{EventBus, LifecycleEvent};
