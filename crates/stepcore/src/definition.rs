use crate::{DefinitionError, EndpointSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Type name under which inline nested flows are declared.
pub const FLOW_TYPE: &str = "flow";

/// A document of flow definitions keyed by flow name, in document order.
pub type FlowDefinitions = IndexMap<String, FlowDefinition>;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Declarative description of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub autostart: bool,

    /// `None` when the key is missing, which is reported differently from an empty map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<IndexMap<String, StepDefinition>>,

    /// Proxy endpoints of the flow.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub endpoints: IndexMap<String, EndpointDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound_steps: Vec<String>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, name: impl Into<String>, step: StepDefinition) -> Self {
        let name = name.into();
        self.steps
            .get_or_insert_with(IndexMap::new)
            .insert(name.clone(), step.with_name(name));
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: EndpointDefinition) -> Self {
        self.endpoints.insert(name.into(), endpoint);
        self
    }

    pub fn with_inbound(mut self, step: impl Into<String>) -> Self {
        self.inbound_steps.push(step.into());
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Reads an inline nested flow out of a step definition of type [`FLOW_TYPE`].
    /// The step's endpoints become the proxy endpoints of the nested flow.
    pub fn from_step(step: &StepDefinition) -> Result<Self, DefinitionError> {
        let value = serde_json::to_value(step).map_err(|e| DefinitionError::InvalidConfig {
            step: step.name.clone(),
            reason: e.to_string(),
        })?;
        let mut definition: FlowDefinition =
            serde_json::from_value(value).map_err(|e| DefinitionError::InvalidConfig {
                step: step.name.clone(),
                reason: e.to_string(),
            })?;
        definition.name = step.name.clone();
        Ok(definition)
    }
}

/// Declarative description of one step inside a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub inbound: bool,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub endpoints: IndexMap<String, EndpointDefinition>,

    /// Type specific configuration fields.
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl StepDefinition {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: Some(step_type.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: impl Into<EndpointDefinition>) -> Self {
        self.endpoints.insert(name.into(), endpoint.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn inbound(mut self) -> Self {
        self.inbound = true;
        self
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Endpoint entry of a step or flow definition.
///
/// The short form is a bare reference expression (`"step/endpoint"`); the long
/// form may additionally declare the endpoint shape and whether the target is
/// mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointDefinition {
    Expression(String),
    Declared(EndpointDeclaration),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,

    /// Flow proxies only: may stay unresolved.
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,

    #[serde(flatten)]
    pub spec: EndpointSpec,
}

impl EndpointDefinition {
    pub fn target(expression: impl Into<String>) -> Self {
        EndpointDefinition::Expression(expression.into())
    }

    pub fn optional(expression: impl Into<String>, spec: EndpointSpec) -> Self {
        EndpointDefinition::Declared(EndpointDeclaration {
            target: Some(expression.into()),
            mandatory: Some(false),
            default: false,
            spec,
        })
    }

    pub fn declared(declaration: EndpointDeclaration) -> Self {
        EndpointDefinition::Declared(declaration)
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            EndpointDefinition::Expression(expression) => Some(expression),
            EndpointDefinition::Declared(declaration) => declaration.target.as_deref(),
        }
    }

    /// Targets are mandatory unless explicitly marked `mandatory: false`.
    pub fn is_mandatory(&self) -> bool {
        match self {
            EndpointDefinition::Expression(_) => true,
            EndpointDefinition::Declared(declaration) => declaration.mandatory.unwrap_or(true),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, EndpointDefinition::Declared(d) if d.default)
    }

    pub fn spec(&self) -> Option<&EndpointSpec> {
        match self {
            EndpointDefinition::Expression(_) => None,
            EndpointDefinition::Declared(declaration) if declaration.spec.is_empty() => None,
            EndpointDefinition::Declared(declaration) => Some(&declaration.spec),
        }
    }
}

impl From<&str> for EndpointDefinition {
    fn from(expression: &str) -> Self {
        EndpointDefinition::Expression(expression.to_string())
    }
}

impl From<String> for EndpointDefinition {
    fn from(expression: String) -> Self {
        EndpointDefinition::Expression(expression)
    }
}

impl From<EndpointDeclaration> for EndpointDefinition {
    fn from(declaration: EndpointDeclaration) -> Self {
        EndpointDefinition::Declared(declaration)
    }
}

/// Parses a JSON document of flow definitions, filling in each flow's name from its key.
pub fn parse_flows(json: &str) -> Result<FlowDefinitions, serde_json::Error> {
    let mut flows: FlowDefinitions = serde_json::from_str(json)?;
    for (name, flow) in flows.iter_mut() {
        flow.name = name.clone();
    }
    Ok(flows)
}
