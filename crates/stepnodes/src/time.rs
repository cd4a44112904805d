use async_trait::async_trait;
use flowgraph::{FlowBuilder, StepFactory, StepMetadata};
use std::any::Any;
use stepcore::{DefinitionError, Step, StepBase, StepDefinition, StepError};
use tokio::time::{sleep, Duration};

pub const DELAY: &str = "delay";

/// Takes `time` milliseconds to start and again to stop.
pub struct DelayStep {
    base: StepBase,
    time: Duration,
}

impl DelayStep {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, DefinitionError> {
        let time = match definition.config.get("time") {
            None => 0,
            Some(value) => value.as_u64().ok_or_else(|| DefinitionError::InvalidConfig {
                step: definition.name.clone(),
                reason: format!("'time' must be a number of milliseconds, got {value}"),
            })?,
        };
        Ok(Self {
            base: StepBase::from_definition(definition, DELAY)
                .with_default_description("Delays its start and stop"),
            time: Duration::from_millis(time),
        })
    }

    pub fn time(&self) -> Duration {
        self.time
    }
}

#[async_trait]
impl Step for DelayStep {
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
        tracing::debug!(step = %self.name(), "Delaying start by {}ms", self.time.as_millis());
        sleep(self.time).await;
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), StepError> {
        tracing::debug!(step = %self.name(), "Delaying stop by {}ms", self.time.as_millis());
        sleep(self.time).await;
        Ok(())
    }
}

pub struct DelayFactory;

impl StepFactory for DelayFactory {
    fn create(
        &self,
        definition: &StepDefinition,
        _builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        Ok(Box::new(DelayStep::from_definition(definition)?))
    }

    fn step_type(&self) -> &str {
        DELAY
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Delays start and stop by 'time' milliseconds".to_string(),
            category: "time".to_string(),
            ..Default::default()
        }
    }
}
