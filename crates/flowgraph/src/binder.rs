use crate::flow::Flow;
use crate::resolver::{resolve, Resolution};
use crate::service::ServiceRegistry;
use std::sync::Arc;
use stepcore::{DefinitionError, Endpoint, EndpointDefinition, Step, StepDefinition};

/// A child endpoint referring to a flow endpoint whose proxy names its own
/// target. It is connected once the flow's proxies are resolved.
pub struct BackReference {
    source: Arc<Endpoint>,
    step: String,
    endpoint: String,
    expression: String,
    flow_endpoint: String,
}

impl BackReference {
    /// Connects the child endpoint to whatever now backs the flow endpoint.
    pub fn connect(self, flow: &Flow) -> Result<(), DefinitionError> {
        let fail = |reason: String| {
            unresolved(flow, &self.step, &self.endpoint, &self.expression, reason)
        };
        let target = flow
            .endpoint(&self.flow_endpoint)
            .filter(|target| !target.is_proxy())
            .cloned()
            .ok_or_else(|| {
                fail(format!(
                    "flow endpoint '{}' is not backed by a step",
                    self.flow_endpoint
                ))
            })?;
        if !Arc::ptr_eq(&target, &self.source) {
            self.source.connect(&target).map_err(|e| fail(e.to_string()))?;
        }
        self.source.set_target_expression(self.expression.as_str());
        Ok(())
    }
}

fn unresolved(
    flow: &Flow,
    step: &str,
    endpoint: &str,
    expression: &str,
    reason: impl ToString,
) -> DefinitionError {
    DefinitionError::UnresolvedTarget {
        flow: flow.name().to_string(),
        step: step.to_string(),
        endpoint: endpoint.to_string(),
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// Looks up the endpoint `name` on `step`, creating it from the declared
/// shape when the step type does not provide it.
fn source_endpoint(
    flow: &mut Flow,
    step: &str,
    name: &str,
    declaration: &EndpointDefinition,
) -> Option<Arc<Endpoint>> {
    let child = flow.step_mut(step)?;
    if let Some(endpoint) = child.endpoint(name) {
        return Some(endpoint.clone());
    }
    let spec = declaration.spec()?;
    let endpoint = Arc::new(Endpoint::from_spec(name, step, spec)?);
    child.endpoints_mut().insert_shared(endpoint.clone());
    Some(endpoint)
}

/// Wires the declared endpoint targets of one child step of `flow`.
///
/// Runs after every child of the flow exists, so forward references resolve.
/// Unresolvable mandatory targets abort construction; unresolvable optional
/// targets remove the endpoint from the step. References to flow endpoints
/// that still wait for their own target are returned for the proxy pass.
pub fn bind_step_endpoints(
    flow: &mut Flow,
    definition: &StepDefinition,
    services: &ServiceRegistry,
) -> Result<Vec<BackReference>, DefinitionError> {
    let step = definition.name.as_str();
    let mut deferred = Vec::new();

    for (name, declaration) in &definition.endpoints {
        let mandatory = declaration.is_mandatory();

        let Some(source) = source_endpoint(flow, step, name, declaration) else {
            let expression = declaration.expression().unwrap_or_default();
            if mandatory {
                return Err(unresolved(
                    flow,
                    step,
                    name,
                    expression,
                    format!("step '{step}' has no endpoint '{name}'"),
                ));
            }
            tracing::warn!("Step '{}' has no endpoint '{}', ignoring optional target", step, name);
            continue;
        };

        // declared shape only, nothing to connect
        let Some(expression) = declaration.expression() else {
            continue;
        };

        match resolve(expression, &*flow, services, mandatory) {
            Ok(Resolution::Endpoint(target)) => {
                source
                    .connect(&target)
                    .map_err(|e| unresolved(flow, step, name, expression, e))?;
                source.set_target_expression(expression);
            }
            Ok(Resolution::FlowEndpoint {
                name: flow_endpoint,
                endpoint,
            }) => {
                if endpoint.is_proxy() && endpoint.proxy_expression().is_some() {
                    // the proxy names its own target, connect to it after the proxy pass
                    deferred.push(BackReference {
                        source,
                        step: step.to_string(),
                        endpoint: name.clone(),
                        expression: expression.to_string(),
                        flow_endpoint,
                    });
                    continue;
                }
                if endpoint.is_proxy() {
                    // back reference: the child's endpoint takes the proxy's place
                    flow.replace_endpoint(&flow_endpoint, source.clone());
                } else if !Arc::ptr_eq(&endpoint, &source) {
                    source
                        .connect(&endpoint)
                        .map_err(|e| unresolved(flow, step, name, expression, e))?;
                }
                source.set_target_expression(expression);
            }
            Ok(Resolution::Pending(pending)) => {
                tracing::debug!(
                    "Endpoint {} waits for service '{}'",
                    source.identifier(),
                    pending.service()
                );
                source.set_target_expression(expression);
                flow.add_outstanding(source, pending);
            }
            Err(problem) if mandatory => {
                return Err(unresolved(flow, step, name, expression, problem));
            }
            Err(problem) => {
                tracing::warn!(
                    "Removing optional endpoint '{}' of step '{}': {}",
                    name,
                    step,
                    problem
                );
                if let Some(child) = flow.step_mut(step) {
                    child.endpoints_mut().remove(name);
                }
            }
        }
    }

    Ok(deferred)
}
