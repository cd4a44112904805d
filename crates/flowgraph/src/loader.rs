use crate::flow::{Flow, FlowTemplate};
use crate::manager::FlowManager;
use std::path::Path;
use std::sync::Arc;
use stepcore::{parse_flows, DefinitionError, FlowDefinitions, FlowError, Step, FLOW_TYPE};

/// Builds and registers a batch of flow definitions.
///
/// Every flow is registered both as a step type under its name (so later
/// definitions can use it as a step) and as a flow instance. If any
/// definition fails to build, or an autostart flow fails to start, nothing of
/// the batch stays registered.
pub async fn load_flows(
    manager: &FlowManager,
    definitions: FlowDefinitions,
) -> Result<Vec<Arc<Flow>>, FlowError> {
    if definitions.is_empty() {
        return Err(DefinitionError::Empty.into());
    }

    let mut templates = Vec::with_capacity(definitions.len());
    let mut built = Vec::with_capacity(definitions.len());

    for (name, mut definition) in definitions {
        definition.name = name.clone();
        definition.step_type.get_or_insert_with(|| FLOW_TYPE.to_string());

        let flow = match manager.build_flow(&definition) {
            Ok(flow) => flow,
            Err(e) => {
                forget_templates(manager, &templates);
                return Err(e);
            }
        };
        if manager.flow(&name).await.is_some() {
            forget_templates(manager, &templates);
            return Err(FlowError::FlowExists(name));
        }

        if manager.has_step_type(&name) {
            tracing::warn!("Flow '{}' shadows an existing step type, not usable as a step", name);
        } else {
            manager.register_step_type(Arc::new(FlowTemplate::new(definition)));
            templates.push(name);
        }
        built.push(flow);
    }

    let mut registered = Vec::with_capacity(built.len());
    for flow in built {
        match manager.register_flow(flow).await {
            Ok(flow) => registered.push(flow),
            Err(e) => {
                for flow in &registered {
                    if let Err(cleanup) = manager.unregister_flow(flow.name()).await {
                        tracing::warn!("Failed to unregister flow '{}': {}", flow.name(), cleanup);
                    }
                }
                forget_templates(manager, &templates);
                return Err(e);
            }
        }
    }

    tracing::info!("Loaded {} flows", registered.len());
    Ok(registered)
}

fn forget_templates(manager: &FlowManager, templates: &[String]) {
    for name in templates {
        manager.unregister_step_type(name);
    }
}

/// Parses a JSON document of flow definitions and loads them.
pub async fn load_flows_from_str(
    manager: &FlowManager,
    json: &str,
) -> Result<Vec<Arc<Flow>>, FlowError> {
    let definitions = parse_flows(json)?;
    load_flows(manager, definitions).await
}

pub async fn load_flows_from_file(
    manager: &FlowManager,
    path: impl AsRef<Path>,
) -> Result<Vec<Arc<Flow>>, FlowError> {
    let json = tokio::fs::read_to_string(path).await?;
    load_flows_from_str(manager, &json).await
}
