//! Addressing model: endpoint identities and target clauses.
//!
//! An [`Endpoint`] names a network participant. Person (`@alias`) and
//! institution (`@+alias`) endpoints carry a persistent alias that is bound
//! once to a 12-byte [`IdEndpoint`]; id endpoints (`@@hex`) are anonymous and
//! identified by those bytes directly. Any endpoint can be narrowed to one
//! instance (`@bob/phone`) or widened to every instance (`@bob/*`).
//!
//! A [`TargetClause`] is a boolean expression over endpoints. It is resolved
//! against the set of endpoints known to the local runtime before routing.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a raw endpoint id.
pub const ID_ENDPOINT_LEN: usize = 12;

/// Errors of the addressing model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// An alias already bound to one id was asked to bind to another.
    #[error("RebindError: {endpoint} is already bound to {bound}, cannot rebind to {requested}")]
    Rebind {
        endpoint: String,
        bound: IdEndpoint,
        requested: IdEndpoint,
    },

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("invalid endpoint id '{0}': expected {ID_ENDPOINT_LEN} hex-encoded bytes")]
    InvalidId(String),
}

pub type AddressResult<T> = Result<T, AddressError>;

// ══════════════════════════════════════════════════════════════════════════════
// IdEndpoint
// ══════════════════════════════════════════════════════════════════════════════

/// Raw endpoint id: 4-byte creation timestamp (seconds, big-endian) followed
/// by 8 random bytes. Equality is by raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IdEndpoint([u8; ID_ENDPOINT_LEN]);

impl IdEndpoint {
    pub fn from_bytes(bytes: [u8; ID_ENDPOINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh id for a newly created local endpoint.
    pub fn generate() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let mut bytes = [0u8; ID_ENDPOINT_LEN];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        rand::thread_rng().fill(&mut bytes[4..]);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; ID_ENDPOINT_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Parse the hex form, with or without the `@@` sigil.
    pub fn from_hex(text: &str) -> AddressResult<Self> {
        let digits = text.strip_prefix("@@").unwrap_or(text);
        hex::decode(digits)
            .ok()
            .and_then(|bytes| Self::from_slice(&bytes))
            .ok_or_else(|| AddressError::InvalidId(text.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8; ID_ENDPOINT_LEN] {
        &self.0
    }

    /// Creation time encoded in the first four bytes.
    pub fn created_at(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IdEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@@{}", self.to_hex())
    }
}

impl fmt::Debug for IdEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdEndpoint({self})")
    }
}

impl From<IdEndpoint> for String {
    fn from(id: IdEndpoint) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for IdEndpoint {
    type Error = AddressError;

    fn try_from(value: String) -> AddressResult<Self> {
        Self::from_hex(&value)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Endpoint
// ══════════════════════════════════════════════════════════════════════════════

/// Endpoint flavour, selected by the sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    /// `@alias`
    Person,
    /// `@+alias`
    Institution,
    /// `@@hexid`
    Id,
}

impl EndpointKind {
    pub fn sigil(self) -> &'static str {
        match self {
            Self::Person => "@",
            Self::Institution => "@+",
            Self::Id => "@@",
        }
    }
}

/// Which instances of an endpoint are meant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Instance {
    /// No instance suffix.
    Main,
    /// `/name`
    Named(String),
    /// `/*`
    Any,
}

/// A network participant.
///
/// Equality, ordering and hashing use the address (kind, name, instance)
/// only; the bound id is identity metadata. Use [`Endpoint::matches`] to
/// compare across alias and id forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    kind: EndpointKind,
    name: String,
    instance: Instance,
    id: Option<IdEndpoint>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Endpoint {
    /// `@alias`
    pub fn person(alias: impl Into<String>) -> Self {
        Self::aliased(EndpointKind::Person, alias.into())
    }

    /// `@+alias`
    pub fn institution(alias: impl Into<String>) -> Self {
        Self::aliased(EndpointKind::Institution, alias.into())
    }

    fn aliased(kind: EndpointKind, name: String) -> Self {
        Self {
            kind,
            name,
            instance: Instance::Main,
            id: None,
        }
    }

    /// Anonymous endpoint addressed by its id.
    pub fn from_id(id: IdEndpoint) -> Self {
        Self {
            kind: EndpointKind::Id,
            name: id.to_hex(),
            instance: Instance::Main,
            id: Some(id),
        }
    }

    /// Parse `@alias`, `@+alias` or `@@hex`, each with an optional
    /// `/instance` or `/*` suffix.
    pub fn parse(text: &str) -> AddressResult<Self> {
        let invalid = || AddressError::InvalidEndpoint(text.to_string());
        let (base, instance) = match text.split_once('/') {
            Some((base, "*")) => (base, Instance::Any),
            Some((base, inst)) if valid_name(inst) => (base, Instance::Named(inst.to_string())),
            Some(_) => return Err(invalid()),
            None => (text, Instance::Main),
        };
        let endpoint = if let Some(hex) = base.strip_prefix("@@") {
            Self::from_id(IdEndpoint::from_hex(hex).map_err(|_| invalid())?)
        } else if let Some(alias) = base.strip_prefix("@+") {
            if !valid_name(alias) {
                return Err(invalid());
            }
            Self::institution(alias)
        } else if let Some(alias) = base.strip_prefix('@') {
            if !valid_name(alias) {
                return Err(invalid());
            }
            Self::person(alias)
        } else {
            return Err(invalid());
        };
        Ok(endpoint.with(instance))
    }

    /// Same endpoint narrowed to `instance`.
    pub fn with_instance(self, instance: impl Into<String>) -> Self {
        self.with(Instance::Named(instance.into()))
    }

    /// Same endpoint widened to all instances (`/*`).
    pub fn any_instance(self) -> Self {
        self.with(Instance::Any)
    }

    /// Same endpoint without an instance suffix.
    pub fn main(&self) -> Self {
        self.clone().with(Instance::Main)
    }

    fn with(mut self, instance: Instance) -> Self {
        self.instance = instance;
        self
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Persistent alias; `None` for anonymous id endpoints.
    pub fn alias(&self) -> Option<&str> {
        match self.kind {
            EndpointKind::Id => None,
            _ => Some(&self.name),
        }
    }

    /// Alias, or hex id for anonymous endpoints.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_name(&self) -> Option<&str> {
        match &self.instance {
            Instance::Named(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.instance == Instance::Any
    }

    pub fn id_endpoint(&self) -> Option<IdEndpoint> {
        self.id
    }

    /// Bind this endpoint to its id. Binding the id it already has is a
    /// no-op; binding a different one fails with [`AddressError::Rebind`].
    pub fn set_id_endpoint(&mut self, id: IdEndpoint) -> AddressResult<()> {
        match self.id {
            None => {
                self.id = Some(id);
                Ok(())
            }
            Some(bound) if bound == id => Ok(()),
            Some(bound) => Err(AddressError::Rebind {
                endpoint: self.to_string(),
                bound,
                requested: id,
            }),
        }
    }

    /// Whether this endpoint, read as a pattern, selects `other`.
    ///
    /// Names match when the addresses are equal or when both sides know the
    /// same bound id. `/*` accepts any instance of the other side; otherwise
    /// instances must be equal.
    pub fn matches(&self, other: &Endpoint) -> bool {
        let same_participant = (self.kind == other.kind && self.name == other.name)
            || matches!((self.id, other.id), (Some(a), Some(b)) if a == b);
        if !same_participant {
            return false;
        }
        match &self.instance {
            Instance::Any => true,
            instance => instance == &other.instance,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name && self.instance == other.instance
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.name.hash(state);
        self.instance.hash(state);
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.kind, &self.name, &self.instance).cmp(&(other.kind, &other.name, &other.instance))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.sigil(), self.name)?;
        match &self.instance {
            Instance::Main => Ok(()),
            Instance::Named(name) => write!(f, "/{name}"),
            Instance::Any => write!(f, "/*"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Target clauses
// ══════════════════════════════════════════════════════════════════════════════

/// Boolean expression over endpoints selecting message receivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetClause {
    Endpoint(Endpoint),
    And(Vec<TargetClause>),
    Or(Vec<TargetClause>),
    Not(Box<TargetClause>),
}

impl From<Endpoint> for TargetClause {
    fn from(endpoint: Endpoint) -> Self {
        Self::Endpoint(endpoint)
    }
}

impl TargetClause {
    /// OR over the given endpoints.
    pub fn any_of(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self::Or(endpoints.into_iter().map(Self::Endpoint).collect())
    }

    /// `self & other`, flattening nested ANDs.
    pub fn and(self, other: TargetClause) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// `self | other`, flattening nested ORs.
    pub fn or(self, other: TargetClause) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    /// `~self`; double negation collapses.
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Concrete receiver set of this clause.
    ///
    /// `universe` lists the endpoints known locally. A plain endpoint leaf
    /// resolves to itself; a `/*` leaf to every known instance it matches;
    /// NOT to the known endpoints outside its operand.
    pub fn resolve(&self, universe: &[Endpoint]) -> BTreeSet<Endpoint> {
        match self {
            Self::Endpoint(endpoint) if endpoint.is_wildcard() => universe
                .iter()
                .filter(|known| endpoint.matches(known))
                .cloned()
                .collect(),
            Self::Endpoint(endpoint) => BTreeSet::from([endpoint.clone()]),
            Self::Or(clauses) => clauses.iter().flat_map(|c| c.resolve(universe)).collect(),
            Self::And(clauses) => {
                let mut sets = clauses.iter().map(|c| c.resolve(universe));
                let first = sets.next().unwrap_or_default();
                sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
            }
            Self::Not(inner) => {
                let excluded = inner.resolve(universe);
                universe
                    .iter()
                    .filter(|known| !excluded.iter().any(|ex| ex.matches(known)))
                    .cloned()
                    .collect()
            }
        }
    }

    /// Whether `endpoint` is selected by this clause.
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        match self {
            Self::Endpoint(pattern) => pattern.matches(endpoint),
            Self::And(clauses) => clauses.iter().all(|c| c.matches(endpoint)),
            Self::Or(clauses) => clauses.iter().any(|c| c.matches(endpoint)),
            Self::Not(inner) => !inner.matches(endpoint),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Or(_) => 1,
            Self::And(_) => 2,
            Self::Not(_) | Self::Endpoint(_) => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        if self.precedence() < parent {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for TargetClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (clauses, separator) = match self {
            Self::Endpoint(endpoint) => return write!(f, "{endpoint}"),
            Self::Not(inner) => {
                f.write_str("~")?;
                return inner.fmt_operand(f, 3);
            }
            Self::And(clauses) => (clauses, " & "),
            Self::Or(clauses) => (clauses, " | "),
        };
        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(separator)?;
            }
            clause.fmt_operand(f, self.precedence() + 1)?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Registry
// ══════════════════════════════════════════════════════════════════════════════

/// Alias bindings and the endpoints known to the local runtime.
///
/// Owned by the addressing layer of one runtime; callers that share it wrap
/// it in their own lock.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    bindings: BTreeMap<Endpoint, IdEndpoint>,
    known: BTreeSet<Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the alias of `endpoint` to `id`. One-way, like
    /// [`Endpoint::set_id_endpoint`].
    pub fn bind(&mut self, endpoint: &Endpoint, id: IdEndpoint) -> AddressResult<()> {
        let key = endpoint.main();
        if let Some(&bound) = self.bindings.get(&key) {
            if bound != id {
                return Err(AddressError::Rebind {
                    endpoint: key.to_string(),
                    bound,
                    requested: id,
                });
            }
            return Ok(());
        }
        self.bindings.insert(key, id);
        Ok(())
    }

    /// Id of `endpoint`: its own, or the one bound to its alias.
    pub fn lookup(&self, endpoint: &Endpoint) -> Option<IdEndpoint> {
        endpoint
            .id_endpoint()
            .or_else(|| self.bindings.get(&endpoint.main()).copied())
    }

    /// Copy of `endpoint` carrying its bound id when one is known.
    pub fn bound(&self, endpoint: &Endpoint) -> Endpoint {
        let mut bound = endpoint.clone();
        if let Some(id) = self.lookup(endpoint) {
            // lookup prefers the endpoint's own id, so this cannot conflict
            let _ = bound.set_id_endpoint(id);
        }
        bound
    }

    /// Record a reachable endpoint for clause resolution.
    pub fn add_known(&mut self, endpoint: Endpoint) {
        let endpoint = self.bound(&endpoint);
        self.known.replace(endpoint);
    }

    pub fn remove_known(&mut self, endpoint: &Endpoint) -> bool {
        self.known.remove(endpoint)
    }

    pub fn known(&self) -> Vec<Endpoint> {
        self.known.iter().cloned().collect()
    }

    /// Resolve `clause` against the known endpoints, with ids filled in.
    pub fn resolve(&self, clause: &TargetClause) -> Vec<Endpoint> {
        clause
            .resolve(&self.known())
            .iter()
            .map(|endpoint| self.bound(endpoint))
            .collect()
    }
}
