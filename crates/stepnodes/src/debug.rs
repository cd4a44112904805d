use crate::inbox::Inbox;
use async_trait::async_trait;
use flowgraph::{FlowBuilder, PortDefinition, StepFactory, StepMetadata};
use std::any::Any;
use stepcore::{DefinitionError, Direction, Endpoint, Step, StepBase, StepDefinition, StepError};

pub const LOG: &str = "log";

/// Logs every message arriving on `in`
pub struct LogStep {
    base: StepBase,
    inbox: Inbox,
}

impl LogStep {
    pub fn from_definition(definition: &StepDefinition) -> Self {
        let (input, receiver) = Endpoint::receiving("in", definition.name.clone());
        Self {
            base: StepBase::from_definition(definition, LOG)
                .with_default_description("Logs received messages")
                .with_endpoint(input.as_default()),
            inbox: Inbox::new(receiver),
        }
    }
}

#[async_trait]
impl Step for LogStep {
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
        let name = self.name().to_string();
        let prefix = self
            .base
            .config()
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or("DEBUG")
            .to_string();
        self.inbox
            .open(self.name(), move |message| {
                tracing::info!(step = %name, "{}: {}", prefix, message);
            })
            .await
    }

    async fn on_stop(&self) -> Result<(), StepError> {
        self.inbox.close(self.name()).await
    }
}

pub struct LogFactory;

impl StepFactory for LogFactory {
    fn create(
        &self,
        definition: &StepDefinition,
        _builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        Ok(Box::new(LogStep::from_definition(definition)))
    }

    fn step_type(&self) -> &str {
        LOG
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Logs received messages for debugging".to_string(),
            category: "debug".to_string(),
            inbound: false,
            endpoints: vec![PortDefinition::new("in", Direction::In, "Messages to log")],
        }
    }
}
