use crate::EndpointError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::mpsc;

/// Payload travelling between connected endpoints.
pub type Message = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Mode an endpoint gets when the declaration does not name one.
    pub fn default_mode(self) -> Mode {
        match self {
            Direction::In => Mode::Passive,
            Direction::Out => Mode::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Active,
    Passive,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Active => "active",
            Mode::Passive => "passive",
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Declarative endpoint shape as it appears in definitions,
/// e.g. `{ "in": true, "passive": true }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(rename = "in", default, skip_serializing_if = "is_false")]
    pub input: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub out: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub passive: bool,
}

impl EndpointSpec {
    pub fn input() -> Self {
        Self {
            input: true,
            passive: true,
            ..Default::default()
        }
    }

    pub fn output() -> Self {
        Self {
            out: true,
            active: true,
            ..Default::default()
        }
    }

    /// `None` when the spec names neither or both directions.
    pub fn direction(&self) -> Option<Direction> {
        match (self.input, self.out) {
            (true, false) => Some(Direction::In),
            (false, true) => Some(Direction::Out),
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match (self.active, self.passive) {
            (true, false) => Some(Mode::Active),
            (false, true) => Some(Mode::Passive),
            _ => self.direction().map(Direction::default_mode),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.input || self.out || self.active || self.passive)
    }
}

enum EndpointKind {
    Real {
        inbox: Option<mpsc::UnboundedSender<Message>>,
    },
    Proxy {
        expression: Option<String>,
    },
}

enum Link {
    Unconnected,
    Target(Arc<Endpoint>),
    Source(Weak<Endpoint>),
}

/// A directional connection point owned by a step, a service or a flow.
///
/// A proxy endpoint is a placeholder owned by a flow. It can be inspected while
/// the graph is built but every connect or send through it fails until it has
/// been replaced by a real endpoint of one of the flow's children.
pub struct Endpoint {
    name: String,
    owner: String,
    direction: Direction,
    mode: Mode,
    default: bool,
    kind: EndpointKind,
    target: RwLock<Option<String>>,
    link: RwLock<Link>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Endpoint {
    fn build(
        name: impl Into<String>,
        owner: impl Into<String>,
        direction: Direction,
        mode: Mode,
        kind: EndpointKind,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            direction,
            mode,
            default: false,
            kind,
            target: RwLock::new(None),
            link: RwLock::new(Link::Unconnected),
        }
    }

    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        direction: Direction,
        mode: Mode,
    ) -> Self {
        Self::build(name, owner, direction, mode, EndpointKind::Real { inbox: None })
    }

    /// Passive `in` endpoint whose delivered messages arrive on the returned receiver.
    pub fn receiving(
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Self::build(
            name,
            owner,
            Direction::In,
            Mode::Passive,
            EndpointKind::Real { inbox: Some(tx) },
        );
        (endpoint, rx)
    }

    /// Active `out` endpoint.
    pub fn sending(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(name, owner, Direction::Out, Mode::Active)
    }

    /// Real endpoint from a declarative spec. `None` if the spec has no single direction.
    pub fn from_spec(
        name: impl Into<String>,
        owner: impl Into<String>,
        spec: &EndpointSpec,
    ) -> Option<Self> {
        let direction = spec.direction()?;
        let mode = spec.mode().unwrap_or_else(|| direction.default_mode());
        Some(Self::new(name, owner, direction, mode))
    }

    /// Placeholder endpoint of a flow. Direction defaults to `in` when the spec omits it.
    pub fn proxy(
        name: impl Into<String>,
        flow: impl Into<String>,
        spec: &EndpointSpec,
        expression: Option<String>,
    ) -> Self {
        let direction = spec.direction().unwrap_or(Direction::In);
        let mode = spec.mode().unwrap_or_else(|| direction.default_mode());
        Self::build(name, flow, direction, mode, EndpointKind::Proxy { expression })
    }

    /// Marks the endpoint as declared by its step type rather than by a definition.
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// `owner/name`, the canonical reference to this endpoint.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, EndpointKind::Proxy { .. })
    }

    pub fn proxy_expression(&self) -> Option<&str> {
        match &self.kind {
            EndpointKind::Proxy { expression } => expression.as_deref(),
            EndpointKind::Real { .. } => None,
        }
    }

    /// The reference expression this endpoint was bound with, if any.
    pub fn target_expression(&self) -> Option<String> {
        read(&self.target).clone()
    }

    pub fn set_target_expression(&self, expression: impl Into<String>) {
        *write(&self.target) = Some(expression.into());
    }

    pub fn is_connected(&self) -> bool {
        if self.is_proxy() {
            return false;
        }
        match &*read(&self.link) {
            Link::Unconnected => false,
            Link::Target(_) => true,
            Link::Source(source) => source.strong_count() > 0,
        }
    }

    /// The endpoint on the other side of the connection.
    pub fn connected_to(&self) -> Option<Arc<Endpoint>> {
        match &*read(&self.link) {
            Link::Unconnected => None,
            Link::Target(target) => Some(target.clone()),
            Link::Source(source) => source.upgrade(),
        }
    }

    fn ensure_real(&self) -> Result<(), EndpointError> {
        if self.is_proxy() {
            return Err(EndpointError::Proxy {
                owner: self.owner.clone(),
                endpoint: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Connects two endpoints. The `out` side becomes authoritative for delivery,
    /// the `in` side keeps a weak back reference.
    pub fn connect(self: &Arc<Self>, other: &Arc<Endpoint>) -> Result<(), EndpointError> {
        self.ensure_real()?;
        other.ensure_real()?;

        let (source, sink) = match (self.direction, other.direction) {
            (Direction::Out, Direction::In) => (self, other),
            (Direction::In, Direction::Out) => (other, self),
            (direction, _) => {
                return Err(EndpointError::DirectionMismatch {
                    from: self.identifier(),
                    to: other.identifier(),
                    direction: direction.as_str().to_string(),
                })
            }
        };

        if source.mode == sink.mode {
            return Err(EndpointError::ModeMismatch {
                from: self.identifier(),
                to: other.identifier(),
                mode: source.mode.as_str().to_string(),
            });
        }

        *write(&source.link) = Link::Target(sink.clone());
        *write(&sink.link) = Link::Source(Arc::downgrade(source));
        tracing::debug!("Connected {} -> {}", source.identifier(), sink.identifier());
        Ok(())
    }

    /// Sends a message through an `out` endpoint to its connected `in` endpoint.
    pub fn send(&self, message: Message) -> Result<(), EndpointError> {
        self.ensure_real()?;
        if self.direction != Direction::Out {
            return Err(EndpointError::NotSending(self.identifier()));
        }
        let target = match &*read(&self.link) {
            Link::Target(target) => target.clone(),
            _ => return Err(EndpointError::NotConnected(self.identifier())),
        };
        target.deliver(message)
    }

    /// Hands a message to the inbox of this endpoint.
    pub fn deliver(&self, message: Message) -> Result<(), EndpointError> {
        match &self.kind {
            EndpointKind::Proxy { .. } => Err(EndpointError::Proxy {
                owner: self.owner.clone(),
                endpoint: self.name.clone(),
            }),
            EndpointKind::Real { inbox: Some(tx) } => tx
                .send(message)
                .map_err(|_| EndpointError::NotReceiving(self.identifier())),
            EndpointKind::Real { inbox: None } => {
                Err(EndpointError::NotReceiving(self.identifier()))
            }
        }
    }

    pub fn spec(&self) -> EndpointSpec {
        EndpointSpec {
            input: self.direction == Direction::In,
            out: self.direction == Direction::Out,
            active: self.mode == Mode::Active,
            passive: self.mode == Mode::Passive,
        }
    }

    /// Definition form: the bound expression if there is one, the spec object otherwise.
    pub fn to_json(&self) -> serde_json::Value {
        match self.target_expression() {
            Some(expression) => serde_json::Value::String(expression),
            None => serde_json::to_value(self.spec()).unwrap_or(serde_json::Value::Null),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("proxy", &self.is_proxy())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// Endpoints of one owner keyed by name, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Endpoints(IndexMap<String, Arc<Endpoint>>);

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Adds an endpoint, returning the one previously registered under that name.
    pub fn insert(&mut self, endpoint: Endpoint) -> Option<Arc<Endpoint>> {
        self.insert_shared(Arc::new(endpoint))
    }

    pub fn insert_shared(&mut self, endpoint: Arc<Endpoint>) -> Option<Arc<Endpoint>> {
        self.0.insert(endpoint.name().to_string(), endpoint)
    }

    /// Replaces the endpoint stored under `name`, keeping its position.
    pub fn replace(&mut self, name: &str, endpoint: Arc<Endpoint>) -> Option<Arc<Endpoint>> {
        match self.0.get_mut(name) {
            Some(slot) => Some(std::mem::replace(slot, endpoint)),
            None => {
                self.0.insert(name.to_string(), endpoint);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Endpoint>> {
        self.0.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Endpoint>)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
