use crate::expression::{parse, EndpointExpression, ResolveProblem};
use crate::service::{wait_for_service, ServiceRegistry};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use stepcore::{Endpoint, Endpoints};

/// What the resolver needs to know about the flow an expression is evaluated in.
pub trait EndpointScope {
    fn scope_name(&self) -> &str;

    /// Endpoints of the child step `step`, `None` if there is no such child.
    fn step_endpoints(&self, step: &str) -> Option<&Endpoints>;

    /// The scope's own (possibly still proxy) endpoints.
    fn own_endpoints(&self) -> &Endpoints;
}

/// Successful outcome of [`resolve`].
pub enum Resolution {
    /// A real endpoint of a sibling step or a registered service.
    Endpoint(Arc<Endpoint>),
    /// An endpoint of the enclosing flow itself, which may still be a proxy.
    FlowEndpoint { name: String, endpoint: Arc<Endpoint> },
    /// The service is not registered yet.
    Pending(PendingEndpoint),
}

/// Deferred endpoint of a service that has not been registered yet.
/// No timeout is imposed; whoever awaits it decides how long to wait.
pub struct PendingEndpoint {
    service: String,
    endpoint: String,
    future: BoxFuture<'static, Result<Arc<Endpoint>, ResolveProblem>>,
}

impl PendingEndpoint {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn into_future(self) -> BoxFuture<'static, Result<Arc<Endpoint>, ResolveProblem>> {
        self.future
    }
}

fn service_endpoint(
    service: &str,
    endpoints: &Endpoints,
    endpoint: &str,
) -> Result<Arc<Endpoint>, ResolveProblem> {
    endpoints
        .get(endpoint)
        .cloned()
        .ok_or_else(|| ResolveProblem::ServiceEndpointNotFound {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
        })
}

fn flow_endpoint(scope: &dyn EndpointScope, endpoint: &str) -> Result<Resolution, ResolveProblem> {
    scope
        .own_endpoints()
        .get(endpoint)
        .map(|found| Resolution::FlowEndpoint {
            name: endpoint.to_string(),
            endpoint: found.clone(),
        })
        .ok_or_else(|| ResolveProblem::FlowEndpointNotFound {
            flow: scope.scope_name().to_string(),
            endpoint: endpoint.to_string(),
        })
}

/// Resolves an endpoint expression inside `scope`.
///
/// A missing service yields a [`PendingEndpoint`] when `wait_if_absent` is set
/// and a [`ResolveProblem`] otherwise. Sibling steps must already exist.
pub fn resolve(
    expression: &str,
    scope: &dyn EndpointScope,
    services: &ServiceRegistry,
    wait_if_absent: bool,
) -> Result<Resolution, ResolveProblem> {
    let parsed = parse(expression)?;
    if parsed.legacy {
        tracing::warn!(
            "Legacy endpoint expression '{}' in flow '{}', use '{}'",
            expression,
            scope.scope_name(),
            parsed.target
        );
    }

    match parsed.target {
        EndpointExpression::Service { service, endpoint } => match services.lookup(&service) {
            Some(found) => {
                service_endpoint(&service, found.endpoints(), &endpoint).map(Resolution::Endpoint)
            }
            None if wait_if_absent => {
                tracing::debug!("Service '{}' not present yet, deferring '{}'", service, expression);
                let watch = services.watch();
                let (name, wanted) = (service.clone(), endpoint.clone());
                let future = async move {
                    let found = wait_for_service(watch, &name)
                        .await
                        .ok_or_else(|| ResolveProblem::RegistryClosed(name.clone()))?;
                    service_endpoint(&name, found.endpoints(), &wanted)
                }
                .boxed();
                Ok(Resolution::Pending(PendingEndpoint {
                    service,
                    endpoint,
                    future,
                }))
            }
            None => Err(ResolveProblem::ServiceNotFound(service)),
        },

        EndpointExpression::Step { step, endpoint } => match scope.step_endpoints(&step) {
            Some(endpoints) => endpoints
                .get(&endpoint)
                .cloned()
                .map(Resolution::Endpoint)
                .ok_or(ResolveProblem::StepEndpointNotFound { step, endpoint }),
            // "myself": the flow referring to its own endpoint by its name
            None if step == scope.scope_name() => flow_endpoint(scope, &endpoint),
            None => Err(ResolveProblem::StepNotFound {
                flow: scope.scope_name().to_string(),
                step,
            }),
        },

        EndpointExpression::Flow { endpoint } => flow_endpoint(scope, &endpoint),
    }
}
