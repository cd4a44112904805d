use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

static SERVICE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^service\(([\w-]+)\)\.([\w-]+)$").expect("valid regex"));
static SERVICE_COLON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+):([\w-]+)$").expect("valid regex"));
static STEP_SLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+)/([\w-]+)$").expect("valid regex"));
static STEP_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+)\.([\w-]+)$").expect("valid regex"));
static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\w-]+)$").expect("valid regex"));

/// Scope word reserved for references to the enclosing flow (`flow:endpoint`).
pub const FLOW_SCOPE: &str = "flow";

/// Why an endpoint expression could not be turned into an endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveProblem {
    #[error("Malformed endpoint expression '{0}'")]
    Malformed(String),

    #[error("Step '{step}' not found in flow '{flow}'")]
    StepNotFound { flow: String, step: String },

    #[error("Endpoint '{endpoint}' of step '{step}' not found")]
    StepEndpointNotFound { step: String, endpoint: String },

    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Endpoint '{endpoint}' of service '{service}' not found")]
    ServiceEndpointNotFound { service: String, endpoint: String },

    #[error("Endpoint '{endpoint}' not declared by flow '{flow}'")]
    FlowEndpointNotFound { flow: String, endpoint: String },

    #[error("Service registry closed while waiting for service '{0}'")]
    RegistryClosed(String),

    #[error("Waiting for service '{0}' was cancelled")]
    Cancelled(String),

    #[error("Connecting to service '{service}' failed: {reason}")]
    ConnectFailed { service: String, reason: String },
}

/// Target of a parsed endpoint expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointExpression {
    /// `service(name).endpoint`, legacy `name:endpoint`
    Service { service: String, endpoint: String },
    /// `step/endpoint`, legacy `step.endpoint`
    Step { step: String, endpoint: String },
    /// `flow:endpoint`, legacy bare `endpoint`
    Flow { endpoint: String },
}

impl fmt::Display for EndpointExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointExpression::Service { service, endpoint } => {
                write!(f, "service({service}).{endpoint}")
            }
            EndpointExpression::Step { step, endpoint } => write!(f, "{step}/{endpoint}"),
            EndpointExpression::Flow { endpoint } => write!(f, "{FLOW_SCOPE}:{endpoint}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExpression {
    pub target: EndpointExpression,
    /// Written in one of the deprecated notations. `target` displays the canonical one.
    pub legacy: bool,
}

/// Classifies an endpoint expression.
///
/// Forms are tried in a fixed order: service, then sibling step, then the
/// enclosing flow. The first match wins.
pub fn parse(expression: &str) -> Result<ParsedExpression, ResolveProblem> {
    let expression = expression.trim();

    if let Some(c) = SERVICE_CALL.captures(expression) {
        return Ok(ParsedExpression {
            target: EndpointExpression::Service {
                service: c[1].to_string(),
                endpoint: c[2].to_string(),
            },
            legacy: false,
        });
    }

    if let Some(c) = SERVICE_COLON.captures(expression) {
        if &c[1] == FLOW_SCOPE {
            return Ok(ParsedExpression {
                target: EndpointExpression::Flow {
                    endpoint: c[2].to_string(),
                },
                legacy: false,
            });
        }
        return Ok(ParsedExpression {
            target: EndpointExpression::Service {
                service: c[1].to_string(),
                endpoint: c[2].to_string(),
            },
            legacy: true,
        });
    }

    for (re, legacy) in [(&*STEP_SLASH, false), (&*STEP_DOT, true)] {
        if let Some(c) = re.captures(expression) {
            return Ok(ParsedExpression {
                target: EndpointExpression::Step {
                    step: c[1].to_string(),
                    endpoint: c[2].to_string(),
                },
                legacy,
            });
        }
    }

    if let Some(c) = BARE.captures(expression) {
        return Ok(ParsedExpression {
            target: EndpointExpression::Flow {
                endpoint: c[1].to_string(),
            },
            legacy: true,
        });
    }

    Err(ResolveProblem::Malformed(expression.to_string()))
}
