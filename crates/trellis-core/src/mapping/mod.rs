//! # Mapping Context
//!
//! Resolves raw declarations into immutable, cached `MappedType` descriptors.
//!
//! Every declared field gets exactly one `FieldStrategy` at build time.
//! Conflicting or unresolvable qualifiers are configuration errors raised
//! here, never at use time.
//!
//! ## Index precedence
//!
//! | Attribute | Highest first |
//! |---|---|
//! | key | `field_name` override, field name |
//! | scope | explicit level, configured default scope |
//! | name | explicit name, then by scope: global per element kind, class = declaring type, instance = concrete type at write time |
//! | kind | explicit kind (exact by default); full-text requires an explicit name |

mod declaration;

pub use declaration::{
    AccessorDeclaration, DegreeComputer, FieldComputer, FieldDeclaration, FieldTraversalBuilder,
    IndexDeclaration, IndexScope, MetadataSource, Qualifier, RelationshipTypeTraversal,
    TypeDeclaration, TypeRegistry, ValueType, ViewDeclaration,
};

use crate::entity::{EntityFactory, EntityRef};
use crate::graph::IndexKind;
use crate::primitives::{
    CONCRETE_LABEL_PREFIX, GLOBAL_NODE_INDEX, GLOBAL_RELATIONSHIP_INDEX, TYPES_INDEX,
};
use crate::{Direction, ElementKind, MappingError, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Resolved index name rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexName {
    /// Known at build time.
    Fixed(String),
    /// The concrete type name of the instance being written.
    PerInstance,
}

/// Resolved index metadata of an indexed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: IndexName,
    pub key: String,
    pub scope: IndexScope,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Resolved relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipSpec {
    pub rel_type: String,
    pub direction: Direction,
    pub target: String,
    pub cardinality: Cardinality,
    pub read_only: bool,
}

/// What a traversal field yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalElement {
    Entities(String),
    Nodes,
    Relationships,
}

/// Resolved traversal field.
#[derive(Debug, Clone)]
pub struct TraversalSpec {
    pub builder: Arc<dyn FieldTraversalBuilder>,
    pub params: Vec<String>,
    pub element: TraversalElement,
}

/// How a field is read and written.
#[derive(Debug, Clone)]
pub enum FieldStrategy {
    Scalar,
    Indexed(IndexSpec),
    Relationship(RelationshipSpec),
    Traversal(TraversalSpec),
    Computed(Arc<dyn FieldComputer>),
}

impl FieldStrategy {
    /// Short tag used in log fields and errors.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Indexed(_) => "indexed",
            Self::Relationship(_) => "relationship",
            Self::Traversal(_) => "traversal",
            Self::Computed(_) => "computed",
        }
    }
}

/// A resolved persistent field.
#[derive(Debug, Clone)]
pub struct PersistentProperty {
    pub name: String,
    pub value_type: ValueType,
    /// Type whose declaration introduced the field.
    pub declaring_type: String,
    pub strategy: FieldStrategy,
}

impl PersistentProperty {
    /// Backed by a store property (scalar or indexed).
    #[must_use]
    pub const fn is_property(&self) -> bool {
        matches!(self.strategy, FieldStrategy::Scalar | FieldStrategy::Indexed(_))
    }

    /// Derived fields and read-only relationship fields reject writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        match &self.strategy {
            FieldStrategy::Traversal(_) | FieldStrategy::Computed(_) => true,
            FieldStrategy::Relationship(spec) => spec.read_only,
            FieldStrategy::Scalar | FieldStrategy::Indexed(_) => false,
        }
    }

    #[must_use]
    pub const fn index(&self) -> Option<&IndexSpec> {
        match &self.strategy {
            FieldStrategy::Indexed(spec) => Some(spec),
            _ => None,
        }
    }

    #[must_use]
    pub const fn relationship(&self) -> Option<&RelationshipSpec> {
        match &self.strategy {
            FieldStrategy::Relationship(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Start or end node field of a relationship entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointField {
    pub name: String,
    pub target: String,
}

/// The resolved, immutable descriptor of one mapped type.
pub struct MappedType {
    pub name: String,
    pub kind: ElementKind,
    /// All ancestors, nearest first.
    pub supertypes: Vec<String>,
    pub relationship_type: Option<String>,
    pub properties: Vec<PersistentProperty>,
    pub start_node: Option<EndpointField>,
    pub end_node: Option<EndpointField>,
    factory: EntityFactory,
}

impl MappedType {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PersistentProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn require_property(&self, name: &str) -> Result<&PersistentProperty, MappingError> {
        self.property(name).ok_or_else(|| MappingError::UnknownField {
            type_name: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// The type itself followed by its ancestors.
    pub fn hierarchy(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.supertypes.iter().map(String::as_str))
    }

    /// True if this type is `type_name` or one of its subtypes.
    #[must_use]
    pub fn is_a(&self, type_name: &str) -> bool {
        self.hierarchy().any(|t| t == type_name)
    }

    #[must_use]
    pub const fn is_node_entity(&self) -> bool {
        matches!(self.kind, ElementKind::Node)
    }

    #[must_use]
    pub const fn is_relationship_entity(&self) -> bool {
        matches!(self.kind, ElementKind::Relationship)
    }

    /// A fresh, unbound instance.
    #[must_use]
    pub fn new_instance(&self) -> EntityRef {
        (self.factory)()
    }
}

impl fmt::Debug for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("supertypes", &self.supertypes)
            .field("relationship_type", &self.relationship_type)
            .field("properties", &self.properties)
            .field("start_node", &self.start_node)
            .field("end_node", &self.end_node)
            .finish()
    }
}

// =============================================================================
// MAPPING CONTEXT
// =============================================================================

/// Build-once cache of mapped type descriptors.
pub struct MappingContext {
    metadata: Arc<dyn MetadataSource>,
    default_scope: IndexScope,
    cache: RwLock<BTreeMap<String, Arc<MappedType>>>,
    builds: AtomicUsize,
}

impl MappingContext {
    pub fn new(metadata: Arc<dyn MetadataSource>, default_scope: IndexScope) -> Self {
        Self {
            metadata,
            default_scope,
            cache: RwLock::new(BTreeMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &dyn MetadataSource {
        self.metadata.as_ref()
    }

    /// The descriptor of `type_name`, built on first request.
    ///
    /// Concurrent first requests build once; later callers get the cached
    /// descriptor.
    pub fn descriptor(&self, type_name: &str) -> Result<Arc<MappedType>, MappingError> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| StoreError::LockPoisoned)?;
            if let Some(found) = cache.get(type_name) {
                return Ok(Arc::clone(found));
            }
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        if let Some(found) = cache.get(type_name) {
            return Ok(Arc::clone(found));
        }

        let built = Arc::new(self.build(type_name)?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(
            type_name,
            kind = %built.kind,
            properties = built.properties.len(),
            "built mapped type"
        );
        cache.insert(type_name.to_string(), Arc::clone(&built));
        Ok(built)
    }

    /// Number of descriptors built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// True if `sub` is `sup` or one of its subtypes.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> Result<bool, MappingError> {
        Ok(self.descriptor(sub)?.is_a(sup))
    }

    /// Build every declared type, failing on the first configuration error.
    pub fn validate_all(&self) -> Result<Vec<Arc<MappedType>>, MappingError> {
        self.metadata
            .type_names()
            .iter()
            .map(|name| self.descriptor(name))
            .collect()
    }

    // -------------------------------------------------------------------------
    // building
    // -------------------------------------------------------------------------

    fn declaration(&self, type_name: &str) -> Result<TypeDeclaration, MappingError> {
        self.metadata
            .declaration(type_name)
            .ok_or_else(|| MappingError::UnknownType(type_name.to_string()))
    }

    /// Ancestors nearest first, depth-first over direct supertypes.
    fn ancestors(&self, declaration: &TypeDeclaration) -> Result<Vec<TypeDeclaration>, MappingError> {
        let mut result: Vec<TypeDeclaration> = Vec::new();
        let mut seen = BTreeSet::from([declaration.name.clone()]);
        let mut stack: Vec<String> = declaration.supertypes.iter().rev().cloned().collect();

        while let Some(name) = stack.pop() {
            if name == declaration.name {
                return Err(MappingError::invalid(
                    &declaration.name,
                    "type hierarchy contains a cycle",
                ));
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            let parent = self.declaration(&name)?;
            if parent.kind != declaration.kind {
                return Err(MappingError::invalid(
                    &declaration.name,
                    format!("supertype {} is a {} entity", parent.name, parent.kind),
                ));
            }
            stack.extend(parent.supertypes.iter().rev().cloned());
            result.push(parent);
        }
        Ok(result)
    }

    fn build(&self, type_name: &str) -> Result<MappedType, MappingError> {
        let declaration = self.declaration(type_name)?;
        let ancestors = self.ancestors(&declaration)?;
        // Type names double as labels; the prefix is reserved for the
        // concrete-type marker.
        for owner in std::iter::once(&declaration).chain(&ancestors) {
            if owner.name.starts_with(CONCRETE_LABEL_PREFIX) {
                return Err(MappingError::invalid(
                    &declaration.name,
                    format!(
                        "type name {} starts with the reserved prefix {CONCRETE_LABEL_PREFIX:?}",
                        owner.name
                    ),
                ));
            }
        }

        let mut mapped = MappedType {
            name: declaration.name.clone(),
            kind: declaration.kind,
            supertypes: ancestors.iter().map(|a| a.name.clone()).collect(),
            relationship_type: declaration.relationship_type.clone(),
            properties: Vec::new(),
            start_node: None,
            end_node: None,
            factory: Arc::clone(&declaration.factory),
        };

        let mut names = BTreeSet::new();
        // Inherited fields first, furthest ancestor first.
        for owner in ancestors.iter().rev().chain(std::iter::once(&declaration)) {
            for field in &owner.fields {
                if !names.insert(field.name.clone()) {
                    return Err(MappingError::conflict(
                        type_name,
                        &field.name,
                        "field declared more than once in the hierarchy",
                    ));
                }
                match self.resolve_field(&owner.name, declaration.kind, field)? {
                    Resolved::Excluded => {}
                    Resolved::Property(property) => mapped.properties.push(property),
                    Resolved::StartNode(endpoint) => {
                        if mapped.start_node.replace(endpoint).is_some() {
                            return Err(MappingError::conflict(
                                type_name,
                                &field.name,
                                "more than one StartNode field",
                            ));
                        }
                    }
                    Resolved::EndNode(endpoint) => {
                        if mapped.end_node.replace(endpoint).is_some() {
                            return Err(MappingError::conflict(
                                type_name,
                                &field.name,
                                "more than one EndNode field",
                            ));
                        }
                    }
                }
            }
        }

        if mapped.is_relationship_entity() {
            if mapped.relationship_type.as_deref().is_none_or(str::is_empty) {
                return Err(MappingError::invalid(
                    type_name,
                    "relationship entity without a relationship type",
                ));
            }
            if mapped.start_node.is_none() || mapped.end_node.is_none() {
                return Err(MappingError::invalid(
                    type_name,
                    "relationship entity needs a StartNode and an EndNode field",
                ));
            }
        }

        Ok(mapped)
    }

    fn require_node_type(&self, owner: &str, field: &str, target: &str) -> Result<(), MappingError> {
        let declaration = self.declaration(target)?;
        if declaration.kind != ElementKind::Node {
            return Err(MappingError::conflict(
                owner,
                field,
                format!("target {target} is not a node entity"),
            ));
        }
        Ok(())
    }

    fn resolve_field(
        &self,
        owner: &str,
        owner_kind: ElementKind,
        field: &FieldDeclaration,
    ) -> Result<Resolved, MappingError> {
        let conflict = |detail: String| MappingError::conflict(owner, &field.name, detail);
        let qualifiers = &field.qualifiers;

        if qualifiers.iter().any(|q| matches!(q, Qualifier::Transient)) {
            if qualifiers.len() > 1 {
                return Err(conflict("Transient cannot be combined with other qualifiers".into()));
            }
            return Ok(Resolved::Excluded);
        }

        // Relationship entity endpoints.
        let endpoint = qualifiers
            .iter()
            .find(|q| matches!(q, Qualifier::StartNode | Qualifier::EndNode));
        if let Some(endpoint) = endpoint {
            if owner_kind != ElementKind::Relationship {
                return Err(conflict(format!("{} on a node entity", endpoint.name())));
            }
            if qualifiers.len() > 1 {
                return Err(conflict(format!(
                    "{} cannot be combined with other qualifiers",
                    endpoint.name()
                )));
            }
            let ValueType::Entity(target) = &field.value_type else {
                return Err(conflict(format!(
                    "{} requires a single entity field",
                    endpoint.name()
                )));
            };
            self.require_node_type(owner, &field.name, target)?;
            let resolved = EndpointField {
                name: field.name.clone(),
                target: target.clone(),
            };
            return Ok(match endpoint {
                Qualifier::StartNode => Resolved::StartNode(resolved),
                _ => Resolved::EndNode(resolved),
            });
        }

        let indexes: Vec<&IndexDeclaration> = qualifiers
            .iter()
            .filter_map(|q| match q {
                Qualifier::Indexed(decl) => Some(decl),
                _ => None,
            })
            .collect();
        if indexes.len() > 1 {
            return Err(conflict("Indexed declared more than once".into()));
        }
        let graph_property = qualifiers
            .iter()
            .any(|q| matches!(q, Qualifier::GraphProperty));

        let derived: Vec<&Qualifier> = qualifiers
            .iter()
            .filter(|q| {
                matches!(
                    q,
                    Qualifier::RelatedTo { .. } | Qualifier::GraphTraversal { .. } | Qualifier::Computed(_)
                )
            })
            .collect();
        if derived.len() > 1 {
            let names: Vec<&str> = derived.iter().map(|q| q.name()).collect();
            return Err(conflict(format!("{} cannot be combined", names.join(" and "))));
        }
        let derived = derived.first().copied();
        if let Some(q) = derived
            && (graph_property || !indexes.is_empty())
        {
            return Err(conflict(format!(
                "{} cannot be combined with GraphProperty or Indexed",
                q.name()
            )));
        }

        let property = |strategy: FieldStrategy| {
            Resolved::Property(PersistentProperty {
                name: field.name.clone(),
                value_type: field.value_type.clone(),
                declaring_type: owner.to_string(),
                strategy,
            })
        };

        match &field.value_type {
            vt if vt.is_scalar() => match derived {
                Some(Qualifier::Computed(computer)) => {
                    Ok(property(FieldStrategy::Computed(Arc::clone(computer))))
                }
                Some(q) => Err(conflict(format!("{} on a scalar field", q.name()))),
                None => match indexes.first() {
                    Some(decl) => {
                        let spec = self.index_spec(owner, owner_kind, &field.name, decl)?;
                        Ok(property(FieldStrategy::Indexed(spec)))
                    }
                    None => Ok(property(FieldStrategy::Scalar)),
                },
            },
            ValueType::Entity(target) | ValueType::Entities(target) => {
                if !indexes.is_empty() {
                    return Err(conflict("Indexed on an entity-valued field".into()));
                }
                if graph_property {
                    return Err(conflict("GraphProperty on an entity-valued field".into()));
                }
                if owner_kind != ElementKind::Node {
                    return Err(conflict(
                        "relationship entities cannot declare related fields".into(),
                    ));
                }
                self.require_node_type(owner, &field.name, target)?;
                let many = matches!(field.value_type, ValueType::Entities(_));

                match derived {
                    Some(Qualifier::Computed(_)) => {
                        Err(conflict("Computed on an entity-valued field".into()))
                    }
                    Some(Qualifier::GraphTraversal { builder, params }) => {
                        if !many {
                            return Err(conflict(
                                "GraphTraversal requires a collection field".into(),
                            ));
                        }
                        Ok(property(FieldStrategy::Traversal(TraversalSpec {
                            builder: Arc::clone(builder),
                            params: params.clone(),
                            element: TraversalElement::Entities(target.clone()),
                        })))
                    }
                    Some(Qualifier::RelatedTo {
                        rel_type,
                        direction,
                        read_only,
                    }) => Ok(property(FieldStrategy::Relationship(RelationshipSpec {
                        rel_type: rel_type.clone().unwrap_or_else(|| field.name.clone()),
                        direction: *direction,
                        target: target.clone(),
                        cardinality: if many { Cardinality::Many } else { Cardinality::One },
                        read_only: *read_only,
                    }))),
                    _ => Ok(property(FieldStrategy::Relationship(RelationshipSpec {
                        rel_type: field.name.clone(),
                        direction: Direction::Outgoing,
                        target: target.clone(),
                        cardinality: if many { Cardinality::Many } else { Cardinality::One },
                        read_only: false,
                    }))),
                }
            }
            ValueType::Nodes | ValueType::Relationships => {
                let Some(Qualifier::GraphTraversal { builder, params }) = derived else {
                    return Err(conflict(format!(
                        "{} fields require GraphTraversal",
                        field.value_type
                    )));
                };
                if owner_kind != ElementKind::Node {
                    return Err(conflict("GraphTraversal on a relationship entity".into()));
                }
                let element = if matches!(field.value_type, ValueType::Nodes) {
                    TraversalElement::Nodes
                } else {
                    TraversalElement::Relationships
                };
                Ok(property(FieldStrategy::Traversal(TraversalSpec {
                    builder: Arc::clone(builder),
                    params: params.clone(),
                    element,
                })))
            }
            _ => Err(conflict(format!("unsupported field type {}", field.value_type))),
        }
    }

    fn index_spec(
        &self,
        owner: &str,
        owner_kind: ElementKind,
        field: &str,
        decl: &IndexDeclaration,
    ) -> Result<IndexSpec, MappingError> {
        if decl.index_name.is_some() && decl.level == Some(IndexScope::Instance) {
            return Err(MappingError::conflict(
                owner,
                field,
                "an explicit index name cannot be combined with instance level",
            ));
        }
        if decl.index_name.as_deref() == Some(TYPES_INDEX) {
            return Err(MappingError::conflict(
                owner,
                field,
                format!("index name {TYPES_INDEX} is reserved"),
            ));
        }

        let key = decl.field_name.clone().unwrap_or_else(|| field.to_string());
        let scope = decl.level.unwrap_or(self.default_scope);

        if decl.kind == IndexKind::Fulltext {
            match decl.index_name.as_deref() {
                None => {
                    return Err(MappingError::conflict(
                        owner,
                        field,
                        "full-text indexes require an explicit index name",
                    ));
                }
                Some(name) if name == owner => {
                    return Err(MappingError::conflict(
                        owner,
                        field,
                        "full-text index name collides with the class index",
                    ));
                }
                Some(_) => {}
            }
        }

        let name = match (&decl.index_name, scope) {
            (Some(name), _) => IndexName::Fixed(name.clone()),
            (None, IndexScope::Global) => IndexName::Fixed(
                match owner_kind {
                    ElementKind::Node => GLOBAL_NODE_INDEX,
                    ElementKind::Relationship => GLOBAL_RELATIONSHIP_INDEX,
                }
                .to_string(),
            ),
            (None, IndexScope::Class) => IndexName::Fixed(owner.to_string()),
            (None, IndexScope::Instance) => IndexName::PerInstance,
        };

        Ok(IndexSpec {
            name,
            key,
            scope,
            kind: decl.kind,
        })
    }
}

impl fmt::Debug for MappingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingContext")
            .field("default_scope", &self.default_scope)
            .field("builds", &self.build_count())
            .finish()
    }
}

enum Resolved {
    Excluded,
    Property(PersistentProperty),
    StartNode(EndpointField),
    EndNode(EndpointField),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicEntity;

    fn node(name: &str) -> TypeDeclaration {
        TypeDeclaration::node(name, DynamicEntity::factory(name))
    }

    fn context(registry: TypeRegistry) -> MappingContext {
        MappingContext::new(Arc::new(registry), IndexScope::Class)
    }

    fn single(decl: TypeDeclaration) -> MappingContext {
        let mut registry = TypeRegistry::new();
        registry.register(node("Person")).register(decl);
        context(registry)
    }

    #[test]
    fn resolves_strategies() {
        let ctx = single(
            node("Group")
                .field(FieldDeclaration::new("name", ValueType::Text).indexed(IndexDeclaration::default()))
                .field(FieldDeclaration::new("admin", ValueType::Bool))
                .field(FieldDeclaration::new("persons", ValueType::Entities("Person".into())))
                .field(FieldDeclaration::new("cache", ValueType::Text).with(Qualifier::Transient)),
        );
        let group = ctx.descriptor("Group").expect("descriptor");

        assert_eq!(group.properties.len(), 3);
        let name = group.property("name").expect("name");
        assert_eq!(
            name.index(),
            Some(&IndexSpec {
                name: IndexName::Fixed("Group".into()),
                key: "name".into(),
                scope: IndexScope::Class,
                kind: IndexKind::Exact,
            })
        );
        assert_eq!(group.property("admin").expect("admin").strategy.tag(), "scalar");
        let persons = group.property("persons").expect("persons");
        assert_eq!(
            persons.relationship(),
            Some(&RelationshipSpec {
                rel_type: "persons".into(),
                direction: Direction::Outgoing,
                target: "Person".into(),
                cardinality: Cardinality::Many,
                read_only: false,
            })
        );
        assert!(group.property("cache").is_none());
    }

    #[test]
    fn index_precedence() {
        let ctx = single(
            node("Group")
                .field(
                    FieldDeclaration::new("otherName", ValueType::Text)
                        .indexed(IndexDeclaration::default().key("other_name")),
                )
                .field(
                    FieldDeclaration::new("global", ValueType::Text)
                        .indexed(IndexDeclaration::default().level(IndexScope::Global)),
                )
                .field(
                    FieldDeclaration::new("instance", ValueType::Text)
                        .indexed(IndexDeclaration::default().level(IndexScope::Instance)),
                )
                .field(
                    FieldDeclaration::new("fullTextName", ValueType::Text)
                        .indexed(IndexDeclaration::default().named("search-groups").fulltext()),
                ),
        );
        let group = ctx.descriptor("Group").expect("descriptor");
        let spec = |f: &str| group.property(f).and_then(PersistentProperty::index).cloned();

        let other = spec("otherName").expect("otherName");
        assert_eq!(other.key, "other_name");
        assert_eq!(other.name, IndexName::Fixed("Group".into()));

        assert_eq!(
            spec("global").expect("global").name,
            IndexName::Fixed(GLOBAL_NODE_INDEX.into())
        );
        assert_eq!(spec("instance").expect("instance").name, IndexName::PerInstance);

        let fulltext = spec("fullTextName").expect("fulltext");
        assert_eq!(fulltext.name, IndexName::Fixed("search-groups".into()));
        assert_eq!(fulltext.kind, IndexKind::Fulltext);
    }

    #[test]
    fn conflicting_qualifiers_fail_at_build() {
        let cases = vec![
            FieldDeclaration::new("a", ValueType::Text)
                .with(Qualifier::Transient)
                .with(Qualifier::GraphProperty),
            FieldDeclaration::new("b", ValueType::Text).related_to("x", Direction::Outgoing),
            FieldDeclaration::new("c", ValueType::Entities("Person".into()))
                .with(Qualifier::GraphProperty)
                .related_to("x", Direction::Outgoing),
            FieldDeclaration::new("d", ValueType::Entity("Person".into()))
                .indexed(IndexDeclaration::default()),
            FieldDeclaration::new("e", ValueType::Nodes),
            FieldDeclaration::new("f", ValueType::Text)
                .indexed(IndexDeclaration::default())
                .indexed(IndexDeclaration::default()),
            FieldDeclaration::new("g", ValueType::Text)
                .indexed(IndexDeclaration::default().fulltext()),
            FieldDeclaration::new("h", ValueType::Text)
                .indexed(IndexDeclaration::default().named("x").level(IndexScope::Instance)),
        ];

        for field in cases {
            let field_name = field.name.clone();
            let ctx = single(node("Group").field(field));
            let err = ctx.descriptor("Group").expect_err(&field_name);
            assert_eq!(err.kind(), crate::ErrorKind::Configuration, "{field_name}");
        }
    }

    #[test]
    fn unknown_target_is_configuration_error() {
        let ctx = single(
            node("Group").field(FieldDeclaration::new("members", ValueType::Entities("Ghost".into()))),
        );
        assert!(matches!(
            ctx.descriptor("Group"),
            Err(MappingError::UnknownType(name)) if name == "Ghost"
        ));
    }

    #[test]
    fn inherited_fields_keep_declaring_type() {
        let mut registry = TypeRegistry::new();
        registry
            .register(node("Named").field(
                FieldDeclaration::new("name", ValueType::Text).indexed(IndexDeclaration::default()),
            ))
            .register(node("Person").extends("Named").field(FieldDeclaration::new("age", ValueType::Int)));
        let ctx = context(registry);

        let person = ctx.descriptor("Person").expect("descriptor");
        assert_eq!(person.supertypes, vec!["Named"]);
        assert!(person.is_a("Named"));
        let name = person.property("name").expect("name");
        assert_eq!(name.declaring_type, "Named");
        assert_eq!(
            name.index().map(|s| &s.name),
            Some(&IndexName::Fixed("Named".into()))
        );
    }

    #[test]
    fn relationship_entity_requires_endpoints() {
        let mut registry = TypeRegistry::new();
        registry.register(node("Person")).register(
            TypeDeclaration::relationship("Friendship", "knows", DynamicEntity::factory("Friendship"))
                .field(FieldDeclaration::new("p1", ValueType::Entity("Person".into())).with(Qualifier::StartNode))
                .field(FieldDeclaration::new("years", ValueType::Int)),
        );
        let ctx = context(registry);
        assert!(matches!(
            ctx.descriptor("Friendship"),
            Err(MappingError::InvalidMapping { .. })
        ));
    }

    #[test]
    fn reserved_prefix_type_names_are_rejected() {
        let mut registry = TypeRegistry::new();
        registry
            .register(node("_Secret"))
            .register(node("Secret"))
            .register(node("Agent").extends("_Secret"));
        let ctx = context(registry);

        for name in ["_Secret", "Agent"] {
            let result = ctx.descriptor(name);
            assert!(matches!(result, Err(MappingError::InvalidMapping { .. })), "{name}");
        }
        assert!(ctx.descriptor("Secret").is_ok());
    }

    #[test]
    fn builds_once_across_threads() {
        let mut registry = TypeRegistry::new();
        registry.register(node("Person").field(FieldDeclaration::new("name", ValueType::Text)));
        let ctx = Arc::new(context(registry));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.descriptor("Person").map(|d| d.properties.len()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("join").expect("descriptor"), 1);
        }
        assert_eq!(ctx.build_count(), 1);
    }
}
