//! Raw declarations handed to the mapping context by the metadata collaborator.
//!
//! A declaration is unresolved: it lists fields with their qualifiers exactly
//! as declared. [`super::MappingContext`] turns it into a [`super::MappedType`].

use crate::convert::Target;
use crate::entity::EntityFactory;
use crate::graph::{GraphDatabase, IndexKind, TraversalDescription};
use crate::{Direction, ElementKind, ElementRef, MappingError, NodeId, StoreError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// VALUE TYPES
// =============================================================================

/// Declared type of a mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    List(Box<ValueType>),
    /// A single related entity of the named type.
    Entity(String),
    /// A collection of related entities of the named type.
    Entities(String),
    /// Raw nodes (traversal fields only).
    Nodes,
    /// Raw relationships (traversal fields only).
    Relationships,
}

impl ValueType {
    /// True for property-backed value types.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Float | Self::Text | Self::List(_)
        )
    }

    /// Convert a stored value to this type.
    ///
    /// `Null` passes through; `Int` widens to `Float`; lists convert
    /// element-wise. Anything else is a conversion error.
    pub fn coerce(&self, value: Value) -> Result<Value, MappingError> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Bool, v @ Value::Bool(_))
            | (Self::Int, v @ Value::Int(_))
            | (Self::Float, v @ Value::Float(_))
            | (Self::Text, v @ Value::Text(_)) => Ok(v),
            (Self::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (Self::List(inner), Value::List(items)) => items
                .into_iter()
                .map(|item| inner.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (target, other) => Err(MappingError::Conversion {
                shape: other.type_name(),
                value: other.to_string(),
                target: target.to_string(),
            }),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Text => f.write_str("text"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::Entity(t) => f.write_str(t),
            Self::Entities(t) => write!(f, "[{t}]"),
            Self::Nodes => f.write_str("nodes"),
            Self::Relationships => f.write_str("relationships"),
        }
    }
}

// =============================================================================
// EXTERNAL FIELD COLLABORATORS
// =============================================================================

/// Builds the traversal backing a traversal-derived field.
pub trait FieldTraversalBuilder: fmt::Debug + Send + Sync {
    fn build(&self, start: NodeId, params: &[String]) -> TraversalDescription;
}

/// Computes the value of a computed field from the bound element.
pub trait FieldComputer: fmt::Debug + Send + Sync {
    fn compute(&self, db: &dyn GraphDatabase, element: ElementRef) -> Result<Value, StoreError>;
}

/// Follows one relationship type; declared params, when present, replace it.
#[derive(Debug, Clone)]
pub struct RelationshipTypeTraversal {
    pub rel_type: String,
    pub direction: Direction,
    pub max_depth: Option<usize>,
}

impl RelationshipTypeTraversal {
    #[must_use]
    pub fn new(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            max_depth: None,
        }
    }
}

impl FieldTraversalBuilder for RelationshipTypeTraversal {
    fn build(&self, _start: NodeId, params: &[String]) -> TraversalDescription {
        let mut description = TraversalDescription::new();
        if params.is_empty() {
            description = description.relationships(self.rel_type.clone(), self.direction);
        } else {
            for rel_type in params {
                description = description.relationships(rel_type.clone(), self.direction);
            }
        }
        match self.max_depth {
            Some(depth) => description.max_depth(depth),
            None => description,
        }
    }
}

/// Number of relationships attached to the element (nodes only).
#[derive(Debug, Clone, Default)]
pub struct DegreeComputer {
    pub rel_type: Option<String>,
    pub direction: Direction,
}

impl FieldComputer for DegreeComputer {
    fn compute(&self, db: &dyn GraphDatabase, element: ElementRef) -> Result<Value, StoreError> {
        match element {
            ElementRef::Node(node) => {
                let count = db
                    .relationships(node, self.rel_type.as_deref(), self.direction)?
                    .len();
                Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
            }
            ElementRef::Relationship(_) => Ok(Value::Null),
        }
    }
}

// =============================================================================
// QUALIFIERS
// =============================================================================

/// Scope of an indexed field's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexScope {
    /// One shared index per element kind.
    Global,
    /// One index per declaring type.
    #[default]
    Class,
    /// One index per concrete type of the written instance.
    Instance,
}

/// Raw `Indexed` qualifier data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDeclaration {
    pub index_name: Option<String>,
    /// Index key override; defaults to the field name.
    pub field_name: Option<String>,
    pub level: Option<IndexScope>,
    pub kind: IndexKind,
}

impl IndexDeclaration {
    #[must_use]
    pub fn named(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    #[must_use]
    pub fn key(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    #[must_use]
    pub fn level(mut self, level: IndexScope) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn fulltext(mut self) -> Self {
        self.kind = IndexKind::Fulltext;
        self
    }
}

/// A declared field qualifier.
#[derive(Debug, Clone)]
pub enum Qualifier {
    GraphProperty,
    Indexed(IndexDeclaration),
    RelatedTo {
        /// Defaults to the field name.
        rel_type: Option<String>,
        direction: Direction,
        read_only: bool,
    },
    GraphTraversal {
        builder: Arc<dyn FieldTraversalBuilder>,
        params: Vec<String>,
    },
    Computed(Arc<dyn FieldComputer>),
    Transient,
    StartNode,
    EndNode,
}

impl Qualifier {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::GraphProperty => "GraphProperty",
            Self::Indexed(_) => "Indexed",
            Self::RelatedTo { .. } => "RelatedTo",
            Self::GraphTraversal { .. } => "GraphTraversal",
            Self::Computed(_) => "Computed",
            Self::Transient => "Transient",
            Self::StartNode => "StartNode",
            Self::EndNode => "EndNode",
        }
    }
}

// =============================================================================
// DECLARATIONS
// =============================================================================

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub name: String,
    pub value_type: ValueType,
    pub qualifiers: Vec<Qualifier>,
}

impl FieldDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            qualifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    #[must_use]
    pub fn indexed(self, index: IndexDeclaration) -> Self {
        self.with(Qualifier::Indexed(index))
    }

    #[must_use]
    pub fn related_to(self, rel_type: impl Into<String>, direction: Direction) -> Self {
        self.with(Qualifier::RelatedTo {
            rel_type: Some(rel_type.into()),
            direction,
            read_only: false,
        })
    }
}

/// One declared mapped type.
#[derive(Clone)]
pub struct TypeDeclaration {
    pub name: String,
    pub kind: ElementKind,
    /// Direct supertypes.
    pub supertypes: Vec<String>,
    /// Store relationship type (relationship entities only).
    pub relationship_type: Option<String>,
    pub fields: Vec<FieldDeclaration>,
    pub factory: EntityFactory,
}

impl TypeDeclaration {
    #[must_use]
    pub fn node(name: impl Into<String>, factory: EntityFactory) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Node,
            supertypes: Vec::new(),
            relationship_type: None,
            fields: Vec::new(),
            factory,
        }
    }

    #[must_use]
    pub fn relationship(
        name: impl Into<String>,
        rel_type: impl Into<String>,
        factory: EntityFactory,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Relationship,
            supertypes: Vec::new(),
            relationship_type: Some(rel_type.into()),
            fields: Vec::new(),
            factory,
        }
    }

    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }
}

impl fmt::Debug for TypeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("supertypes", &self.supertypes)
            .field("relationship_type", &self.relationship_type)
            .field("fields", &self.fields)
            .finish()
    }
}

/// One accessor of a map-result view.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessorDeclaration {
    pub name: String,
    /// Result column; defaults to the accessor name.
    pub column: Option<String>,
    pub target: Target,
}

/// A map-result view: named accessors over a result row.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDeclaration {
    pub name: String,
    pub accessors: Vec<AccessorDeclaration>,
}

impl ViewDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accessors: Vec::new(),
        }
    }

    #[must_use]
    pub fn accessor(mut self, name: impl Into<String>, target: Target) -> Self {
        self.accessors.push(AccessorDeclaration {
            name: name.into(),
            column: None,
            target,
        });
        self
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column: impl Into<String>, target: Target) -> Self {
        self.accessors.push(AccessorDeclaration {
            name: name.into(),
            column: Some(column.into()),
            target,
        });
        self
    }
}

// =============================================================================
// METADATA SOURCE
// =============================================================================

/// The metadata collaborator: supplies raw declarations by name.
pub trait MetadataSource: Send + Sync {
    fn declaration(&self, type_name: &str) -> Option<TypeDeclaration>;

    /// All declared type names, in name order.
    fn type_names(&self) -> Vec<String>;

    fn view(&self, name: &str) -> Option<ViewDeclaration>;
}

/// Programmatic metadata source.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDeclaration>,
    views: BTreeMap<String, ViewDeclaration>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any declaration with the same name.
    pub fn register(&mut self, declaration: TypeDeclaration) -> &mut Self {
        self.types.insert(declaration.name.clone(), declaration);
        self
    }

    pub fn register_view(&mut self, view: ViewDeclaration) -> &mut Self {
        self.views.insert(view.name.clone(), view);
        self
    }
}

impl MetadataSource for TypeRegistry {
    fn declaration(&self, type_name: &str) -> Option<TypeDeclaration> {
        self.types.get(type_name).cloned()
    }

    fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    fn view(&self, name: &str) -> Option<ViewDeclaration> {
        self.views.get(name).cloned()
    }
}
