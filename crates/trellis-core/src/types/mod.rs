//! # Core Type Definitions
//!
//! This module contains the vocabulary shared by the store collaborator and
//! the mapping core:
//! - Store identifiers (`NodeId`, `RelationshipId`, `ElementRef`, `ElementKind`)
//! - Property values (`Value`, `Properties`)
//! - Store records (`Relationship`, `Path`, `Direction`)
//! - Error types (`StoreError`, `MappingError`, `ErrorKind`)
//!
//! ## Ownership
//!
//! Identifiers are plain `Copy` handles. The mapping layer never owns store
//! data; it only references elements whose lifetime is the store's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// STORE IDENTIFIERS
// =============================================================================

/// Identifier of a node in the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier of a relationship in the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipId(pub u64);

/// The two kinds of store element an entity can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Node,
    Relationship,
}

impl ElementKind {
    /// Lower-case name, used in log fields and default index names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Relationship => "relationship",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a store element: opaque id plus kind.
///
/// The mapping layer holds these, never the element data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementRef {
    Node(NodeId),
    Relationship(RelationshipId),
}

impl ElementRef {
    /// The kind of element this reference points at.
    #[must_use]
    pub const fn kind(self) -> ElementKind {
        match self {
            Self::Node(_) => ElementKind::Node,
            Self::Relationship(_) => ElementKind::Relationship,
        }
    }

    /// The raw numeric id, without its kind.
    #[must_use]
    pub const fn id(self) -> u64 {
        match self {
            Self::Node(id) => id.0,
            Self::Relationship(id) => id.0,
        }
    }

    /// Returns the node id if this is a node reference.
    #[must_use]
    pub const fn as_node(self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Relationship(_) => None,
        }
    }

    /// Returns the relationship id if this is a relationship reference.
    #[must_use]
    pub const fn as_relationship(self) -> Option<RelationshipId> {
        match self {
            Self::Node(_) => None,
            Self::Relationship(id) => Some(id),
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node({})", id.0),
            Self::Relationship(id) => write!(f, "relationship({})", id.0),
        }
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// A property value as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Short name of the value's shape, used in conversion errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The strings under which this value is written to an index.
    ///
    /// `Null` produces no entry; lists produce one entry per element.
    #[must_use]
    pub fn index_keys(&self) -> Vec<String> {
        match self {
            Self::Null => Vec::new(),
            Self::List(items) => items.iter().flat_map(Self::index_keys).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Property bag of a store element, ordered by key.
pub type Properties = BTreeMap<String, Value>;

// =============================================================================
// STORE RECORDS
// =============================================================================

/// Direction of a relationship relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// The direction as seen from the other end.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }
}

/// A relationship record as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub start: NodeId,
    pub end: NodeId,
    pub rel_type: String,
}

impl Relationship {
    /// The node at the other end of this relationship, seen from `node`.
    #[must_use]
    pub fn other_node(&self, node: NodeId) -> NodeId {
        if self.start == node { self.end } else { self.start }
    }
}

/// A path through the graph: `nodes.len() == relationships.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub relationships: Vec<RelationshipId>,
}

impl Path {
    /// A zero-length path consisting of a single node.
    #[must_use]
    pub fn single(node: NodeId) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    /// Extend the path by one hop.
    #[must_use]
    pub fn extended(&self, relationship: RelationshipId, node: NodeId) -> Self {
        let mut next = self.clone();
        next.relationships.push(relationship);
        next.nodes.push(node);
        next
    }

    #[must_use]
    pub fn start_node(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    #[must_use]
    pub fn end_node(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    #[must_use]
    pub fn last_relationship(&self) -> Option<RelationshipId> {
        self.relationships.last().copied()
    }

    /// Number of relationships in the path.
    #[must_use]
    pub fn length(&self) -> usize {
        self.relationships.len()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by a store collaborator.
///
/// The mapping core propagates these unchanged and never retries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested node does not exist.
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// The requested relationship does not exist.
    #[error("Relationship not found: {0:?}")]
    RelationshipNotFound(RelationshipId),

    /// A write was issued without an active unit of work.
    #[error("No active transaction")]
    NoTransaction,

    /// `begin_tx` was called while a unit of work was already active.
    #[error("A transaction is already active")]
    TransactionActive,

    /// A node cannot be deleted while relationships are attached.
    #[error("Node {0:?} still has relationships")]
    NodeHasRelationships(NodeId),

    /// An index exists with a different kind than requested.
    #[error("Index conflict: {0}")]
    IndexConflict(String),

    /// The store does not support the requested capability.
    #[error("Unsupported store operation: {0}")]
    Unsupported(&'static str),

    /// Internal lock poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Category of a [`MappingError`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unresolvable or conflicting mapping; fatal, never retried.
    Configuration,
    /// Operation on a removed or unbound entity, or outside a unit of work.
    State,
    /// Unsupported result shape for the requested target.
    Conversion,
    /// Failure reported by the store collaborator.
    Store,
}

/// Errors raised by the mapping core.
#[derive(Debug, Error)]
pub enum MappingError {
    /// No declaration exists for the named type.
    #[error("Unknown mapped type: {0}")]
    UnknownType(String),

    /// No view declaration exists for the named map-result type.
    #[error("Unknown map result view: {0}")]
    UnknownView(String),

    /// A field carries qualifiers that cannot be combined.
    #[error("Conflicting mapping for {type_name}.{field}: {detail}")]
    ConflictingQualifiers {
        type_name: String,
        field: String,
        detail: String,
    },

    /// A declaration is structurally invalid.
    #[error("Invalid mapping for {type_name}: {detail}")]
    InvalidMapping { type_name: String, detail: String },

    /// The named field is not part of the type's mapping.
    #[error("Unknown field {type_name}.{field}")]
    UnknownField { type_name: String, field: String },

    /// An instance of the wrong type was handed to a typed field.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A write was attempted outside a unit of work.
    #[error("{0} requires an active unit of work")]
    NoTransaction(&'static str),

    /// The bound store element has been removed.
    #[error("Store element {0} has been removed")]
    ElementRemoved(ElementRef),

    /// The entity is not bound to a store element.
    #[error("Entity of type {0} is not bound to a store element")]
    Unbound(String),

    /// The element has no type record, so its type cannot be inferred.
    #[error("Store element {0} has no recorded type")]
    Unrecorded(ElementRef),

    /// The element kind does not match the mapped type's kind.
    #[error("Expected a {expected} element, got {actual}")]
    KindMismatch { expected: ElementKind, actual: ElementRef },

    /// A write was attempted on a derived field.
    #[error("Field {type_name}.{field} is read-only")]
    ReadOnlyField { type_name: String, field: String },

    /// A value could not be converted to the declared type.
    #[error("Cannot convert {shape} value {value} to {target}")]
    Conversion {
        shape: &'static str,
        value: String,
        target: String,
    },

    /// A raw result cannot be converted to the requested target.
    #[error("Unsupported result: cannot convert {shape} to {target}")]
    UnsupportedResult { shape: String, target: String },

    /// The map-result view has no such accessor.
    #[error("View {view} has no accessor {accessor}")]
    UnknownAccessor { view: String, accessor: String },

    /// An error reported by the store, propagated unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MappingError {
    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownType(_)
            | Self::UnknownView(_)
            | Self::ConflictingQualifiers { .. }
            | Self::InvalidMapping { .. }
            | Self::UnknownField { .. }
            | Self::TypeMismatch { .. } => ErrorKind::Configuration,
            Self::NoTransaction(_)
            | Self::ElementRemoved(_)
            | Self::Unbound(_)
            | Self::Unrecorded(_)
            | Self::KindMismatch { .. }
            | Self::ReadOnlyField { .. } => ErrorKind::State,
            Self::Conversion { .. }
            | Self::UnsupportedResult { .. }
            | Self::UnknownAccessor { .. } => ErrorKind::Conversion,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn invalid(type_name: &str, detail: impl Into<String>) -> Self {
        Self::InvalidMapping {
            type_name: type_name.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn conflict(type_name: &str, field: &str, detail: impl Into<String>) -> Self {
        Self::ConflictingQualifiers {
            type_name: type_name.to_string(),
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
