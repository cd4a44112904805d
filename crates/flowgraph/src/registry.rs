use crate::builder::FlowBuilder;
use crate::flow::FlowFactory;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{DefinitionError, Direction, Step, StepDefinition};

/// Factory trait for creating step instances
pub trait StepFactory: Send + Sync {
    /// Create a new step from its definition. `builder` is handed through so
    /// that composite steps can build nested flows.
    fn create(
        &self,
        definition: &StepDefinition,
        builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError>;

    /// Get step type identifier
    fn step_type(&self) -> &str;

    /// Optional: Get step metadata (description, declared endpoints, ...)
    fn metadata(&self) -> StepMetadata {
        StepMetadata::default()
    }
}

/// Metadata about a step type
#[derive(Debug, Clone)]
pub struct StepMetadata {
    pub description: String,
    pub category: String,
    pub inbound: bool,
    pub endpoints: Vec<PortDefinition>,
}

impl Default for StepMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inbound: false,
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub direction: Direction,
    pub description: String,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, direction: Direction, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction,
            description: description.into(),
        }
    }
}

/// Registry of available step types.
///
/// The inline nested flow type is always registered.
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(Arc::new(FlowFactory));
        registry
    }

    /// Register a step factory, replacing any factory of the same type
    pub fn register(&mut self, factory: Arc<dyn StepFactory>) -> Option<Arc<dyn StepFactory>> {
        let step_type = factory.step_type().to_string();
        tracing::info!("Registering step type: {}", step_type);
        self.factories.insert(step_type, factory)
    }

    pub fn unregister(&mut self, step_type: &str) -> Option<Arc<dyn StepFactory>> {
        self.factories.remove(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    /// Create a step instance of the type named in its definition
    pub fn create_step(
        &self,
        flow: &str,
        definition: &StepDefinition,
        builder: &FlowBuilder<'_>,
    ) -> Result<Box<dyn Step>, DefinitionError> {
        let step_type = definition
            .step_type
            .as_deref()
            .ok_or_else(|| DefinitionError::MissingStepType {
                flow: flow.to_string(),
                step: definition.name.clone(),
            })?;

        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| DefinitionError::UnknownStepType {
                flow: flow.to_string(),
                step: definition.name.clone(),
                step_type: step_type.to_string(),
            })?;

        let mut step = factory.create(definition, builder)?;
        if definition.inbound || factory.metadata().inbound {
            step.set_inbound(true);
        }
        Ok(step)
    }

    /// Get all registered step types
    pub fn list_step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a step type
    pub fn get_metadata(&self, step_type: &str) -> Option<StepMetadata> {
        self.factories.get(step_type).map(|f| f.metadata())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
