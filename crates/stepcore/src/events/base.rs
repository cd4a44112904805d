use crate::StepState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by a flow manager while flows come and go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    FlowRegistered {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowUnregistered {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowStateChanged {
        flow: String,
        state: StepState,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn registered(flow: impl Into<String>) -> Self {
        LifecycleEvent::FlowRegistered {
            flow: flow.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unregistered(flow: impl Into<String>) -> Self {
        LifecycleEvent::FlowUnregistered {
            flow: flow.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(flow: impl Into<String>, state: StepState) -> Self {
        LifecycleEvent::FlowStateChanged {
            flow: flow.into(),
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn flow(&self) -> &str {
        match self {
            LifecycleEvent::FlowRegistered { flow, .. }
            | LifecycleEvent::FlowUnregistered { flow, .. }
            | LifecycleEvent::FlowStateChanged { flow, .. } => flow,
        }
    }
}

/// Broadcast bus for lifecycle events. Emitting never blocks and succeeds
/// without subscribers.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }
}
