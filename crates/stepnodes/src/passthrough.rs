use crate::inbox::Inbox;
use async_trait::async_trait;
use flowgraph::{FlowBuilder, PortDefinition, StepFactory, StepMetadata};
use std::any::Any;
use stepcore::{DefinitionError, Direction, Endpoint, Step, StepBase, StepDefinition, StepError};

pub const PASSTHROUGH: &str = "passthrough";

/// Forwards every message arriving on `in` to `out` while running.
pub struct PassthroughStep {
    base: StepBase,
    inbox: Inbox,
}

impl PassthroughStep {
    pub fn from_definition(definition: &StepDefinition) -> Self {
        let name = definition.name.clone();
        let (input, receiver) = Endpoint::receiving("in", name.clone());
        let base = StepBase::from_definition(definition, PASSTHROUGH)
            .with_default_description("Forwards messages from 'in' to 'out'")
            .with_endpoint(input.as_default())
            .with_endpoint(Endpoint::sending("out", name).as_default());
        Self {
            base,
            inbox: Inbox::new(receiver),
        }
    }
}

#[async_trait]
impl Step for PassthroughStep {
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
        let out = self.endpoint("out").cloned();
        self.inbox
            .open(self.name(), move |message| match &out {
                Some(out) => {
                    if let Err(e) = out.send(message) {
                        tracing::warn!(step = %name, "Dropping message: {}", e);
                    }
                }
                None => tracing::debug!(step = %name, "No 'out' endpoint, dropping message"),
            })
            .await
    }

    async fn on_stop(&self) -> Result<(), StepError> {
        self.inbox.close(self.name()).await
    }
}

pub struct PassthroughFactory;

impl StepFactory for PassthroughFactory {
    fn create(
        &self,
        definition: &StepDefinition,
        _builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        Ok(Box::new(PassthroughStep::from_definition(definition)))
    }

    fn step_type(&self) -> &str {
        PASSTHROUGH
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Forwards messages from 'in' to 'out'".to_string(),
            category: "transform".to_string(),
            inbound: false,
            endpoints: vec![
                PortDefinition::new("in", Direction::In, "Messages to forward"),
                PortDefinition::new("out", Direction::Out, "Forwarded messages"),
            ],
        }
    }
}
