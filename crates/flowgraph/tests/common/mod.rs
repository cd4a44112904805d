#![allow(dead_code)]

use async_trait::async_trait;
use flowgraph::{FlowBuilder, FlowManager, ManagerConfig, StepFactory, StepRegistry};
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepcore::{
    DefinitionError, Direction, Endpoint, Mode, Step, StepBase, StepDefinition, StepError,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn position(journal: &Journal, entry: &str) -> usize {
    entries(journal)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{entry}' not in journal {:?}", entries(journal)))
}

/// Step that writes its lifecycle calls to a shared journal.
///
/// Config: `delay` (ms spent in start), `fail_start`, `fail_stop`.
pub struct RecordingStep {
    base: StepBase,
    journal: Journal,
    delay: Duration,
    fail_start: bool,
    fail_stop: bool,
}

impl RecordingStep {
    fn record(&self, event: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{event}:{}", self.name()));
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StepBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn on_start(&self) -> Result<(), StepError> {
        self.record("start");
        tokio::time::sleep(self.delay).await;
        if self.fail_start {
            return Err(StepError::StartFailed {
                step: self.name().to_string(),
                reason: "configured to fail".into(),
            });
        }
        self.record("started");
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), StepError> {
        self.record("stop");
        if self.fail_stop {
            return Err(StepError::StopFailed {
                step: self.name().to_string(),
                reason: "configured to fail".into(),
            });
        }
        self.record("stopped");
        Ok(())
    }

    async fn on_remove(&self) -> Result<(), StepError> {
        self.record("remove");
        Ok(())
    }
}

pub struct RecordingFactory {
    journal: Journal,
}

impl RecordingFactory {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl StepFactory for RecordingFactory {
    fn create(
        &self,
        definition: &StepDefinition,
        _builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        let flag = |key: &str| {
            definition
                .config
                .get(key)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };
        let name = definition.name.clone();
        let base = StepBase::from_definition(definition, "record")
            .with_endpoint(Endpoint::new("in", name.clone(), Direction::In, Mode::Passive).as_default())
            .with_endpoint(Endpoint::new("out", name, Direction::Out, Mode::Active).as_default());

        Ok(Box::new(RecordingStep {
            base,
            journal: self.journal.clone(),
            delay: Duration::from_millis(definition.config_u64("delay").unwrap_or(0)),
            fail_start: flag("fail_start"),
            fail_stop: flag("fail_stop"),
        }))
    }

    fn step_type(&self) -> &str {
        "record"
    }
}

pub fn registry(journal: &Journal) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(Arc::new(RecordingFactory::new(journal.clone())));
    registry
}

pub fn manager(journal: &Journal) -> FlowManager {
    FlowManager::with_registry(registry(journal), ManagerConfig::default())
}
