use crate::binder::bind_step_endpoints;
use crate::expression::{parse, EndpointExpression, ResolveProblem};
use crate::flow::Flow;
use crate::registry::StepRegistry;
use crate::service::ServiceRegistry;
use std::sync::Arc;
use stepcore::{DefinitionError, Endpoint, FlowDefinition, Step, FLOW_TYPE};

/// Nesting limit for flows inside flows.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Turns flow definitions into flow graphs.
pub struct FlowBuilder<'a> {
    registry: &'a StepRegistry,
    services: &'a ServiceRegistry,
    depth: usize,
}

/// Build a flow from its definition.
pub fn build_flow(
    definition: &FlowDefinition,
    registry: &StepRegistry,
    services: &ServiceRegistry,
) -> Result<Flow, DefinitionError> {
    FlowBuilder::new(registry, services).build(definition)
}

impl<'a> FlowBuilder<'a> {
    pub fn new(registry: &'a StepRegistry, services: &'a ServiceRegistry) -> Self {
        Self {
            registry,
            services,
            depth: 0,
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        self.registry
    }

    pub fn services(&self) -> &ServiceRegistry {
        self.services
    }

    /// Build a top level flow.
    pub fn build(&self, definition: &FlowDefinition) -> Result<Flow, DefinitionError> {
        let step_type = definition.step_type.as_deref().unwrap_or(FLOW_TYPE);
        self.build_as(definition, step_type)
    }

    /// Build a flow that will live as a step of another flow.
    pub fn build_nested(
        &self,
        definition: &FlowDefinition,
        step_type: &str,
    ) -> Result<Flow, DefinitionError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(DefinitionError::NestingTooDeep {
                flow: definition.name.clone(),
                depth: MAX_NESTING_DEPTH,
            });
        }
        let nested = FlowBuilder {
            registry: self.registry,
            services: self.services,
            depth: self.depth + 1,
        };
        nested.build_as(definition, step_type)
    }

    fn build_as(&self, definition: &FlowDefinition, step_type: &str) -> Result<Flow, DefinitionError> {
        let name = definition.name.as_str();
        let steps = definition
            .steps
            .as_ref()
            .ok_or_else(|| DefinitionError::NoSteps {
                flow: name.to_string(),
            })?;
        if steps.is_empty() {
            return Err(DefinitionError::EmptySteps {
                flow: name.to_string(),
            });
        }

        tracing::debug!("Building flow '{}' with {} steps", name, steps.len());
        let mut flow = Flow::shell(definition, step_type);

        // create every child first so that bindings can refer forward
        let mut step_definitions = Vec::with_capacity(steps.len());
        for (step_name, step_definition) in steps {
            let mut step_definition = step_definition.clone();
            step_definition.name = step_name.clone();
            let step = self.registry.create_step(name, &step_definition, self)?;
            flow.insert_step(step);
            step_definitions.push(step_definition);
        }

        for inbound in &definition.inbound_steps {
            let step = flow
                .step_mut(inbound)
                .ok_or_else(|| DefinitionError::UnknownInboundStep {
                    flow: name.to_string(),
                    step: inbound.clone(),
                })?;
            step.set_inbound(true);
        }

        let mut back_references = Vec::new();
        for step_definition in &step_definitions {
            // endpoints of an inline nested flow are its own proxies, bound while it was built
            if step_definition.step_type.as_deref() == Some(FLOW_TYPE) {
                continue;
            }
            back_references.extend(bind_step_endpoints(&mut flow, step_definition, self.services)?);
        }

        resolve_proxies(&mut flow, definition)?;
        for back_reference in back_references {
            back_reference.connect(&flow)?;
        }

        tracing::info!("Built flow '{}' ({})", name, flow.id());
        Ok(flow)
    }
}

enum ProxyTarget {
    Child(Arc<Endpoint>),
    Alias(String),
}

fn proxy_target(flow: &Flow, expression: &str) -> Result<ProxyTarget, ResolveProblem> {
    match parse(expression)?.target {
        EndpointExpression::Step { step, endpoint } if flow.step(&step).is_some() => flow
            .step(&step)
            .and_then(|child| child.endpoint(&endpoint))
            .cloned()
            .map(ProxyTarget::Child)
            .ok_or(ResolveProblem::StepEndpointNotFound { step, endpoint }),
        EndpointExpression::Step { step, endpoint } if step == flow.name() => {
            Ok(ProxyTarget::Alias(endpoint))
        }
        EndpointExpression::Step { step, .. } => Err(ResolveProblem::StepNotFound {
            flow: flow.name().to_string(),
            step,
        }),
        EndpointExpression::Flow { endpoint } => Ok(ProxyTarget::Alias(endpoint)),
        EndpointExpression::Service { .. } => Err(ResolveProblem::Malformed(format!(
            "{expression} (flow endpoints may only refer to their own steps)"
        ))),
    }
}

/// Replaces the flow's remaining proxy endpoints by the child endpoints their
/// expressions name. Aliases of other flow endpoints are resolved last.
fn resolve_proxies(flow: &mut Flow, definition: &FlowDefinition) -> Result<(), DefinitionError> {
    let unresolved_proxy = |flow: &Flow, endpoint: &str, expression: &str, reason: String| {
        DefinitionError::UnresolvedProxy {
            flow: flow.name().to_string(),
            endpoint: endpoint.to_string(),
            expression: expression.to_string(),
            reason,
        }
    };

    let mut aliases = Vec::new();
    for (name, declaration) in &definition.endpoints {
        let still_proxy = flow.endpoint(name).is_some_and(|e| e.is_proxy());
        if !still_proxy {
            continue;
        }

        let Some(expression) = declaration.expression() else {
            if declaration.is_default() {
                continue;
            }
            return Err(DefinitionError::DanglingProxy {
                flow: flow.name().to_string(),
                endpoint: name.clone(),
            });
        };

        match proxy_target(flow, expression) {
            Ok(ProxyTarget::Child(endpoint)) => {
                if let Some(direction) = declaration.spec().and_then(|spec| spec.direction()) {
                    if direction != endpoint.direction() {
                        return Err(unresolved_proxy(
                            &*flow,
                            name,
                            expression,
                            format!(
                                "declared '{}' but {} is '{}'",
                                direction.as_str(),
                                endpoint.identifier(),
                                endpoint.direction().as_str()
                            ),
                        ));
                    }
                }
                flow.replace_endpoint(name, endpoint);
            }
            Ok(ProxyTarget::Alias(other)) => aliases.push((name.clone(), expression, other)),
            Err(_) if declaration.is_default() => {}
            Err(problem) => {
                return Err(unresolved_proxy(&*flow, name, expression, problem.to_string()))
            }
        }
    }

    for (name, expression, other) in aliases {
        let target = flow
            .endpoint(&other)
            .filter(|e| !e.is_proxy() && other != name)
            .cloned();
        match target {
            Some(endpoint) => flow.replace_endpoint(&name, endpoint),
            None if definition.endpoints.get(&name).is_some_and(|d| d.is_default()) => {}
            None => {
                return Err(unresolved_proxy(
                    &*flow,
                    &name,
                    expression,
                    format!("flow endpoint '{other}' is not backed by a step"),
                ))
            }
        }
    }

    Ok(())
}
