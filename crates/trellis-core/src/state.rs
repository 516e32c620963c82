//! # Entity State
//!
//! Per-instance adapter binding one mapped instance to one store element.
//!
//! `EntityState` serves every field through its resolved `FieldStrategy`:
//! - scalar and indexed fields read/write the element's property bag
//!   (indexed writes also move the index entry)
//! - relationship fields enumerate or synchronize relationships
//! - traversal fields run the field's traversal builder
//! - computed fields ask the field's computer
//!
//! Collection fields come back as a `LazySequence`: nothing is read from the
//! store until `iter()` is called, and each call queries again. Only
//! read-only relationship fields keep their materialized element list for
//! the lifetime of the state.

use crate::entity::{EntityRef, FieldValue};
use crate::graph::TraversalDescription;
use crate::index::IndexProvider;
use crate::infrastructure::MappingInfrastructure;
use crate::mapping::{
    Cardinality, FieldStrategy, MappedType, PersistentProperty, RelationshipSpec,
    TraversalElement, TraversalSpec,
};
use crate::persister::MappingPolicy;
use crate::{Direction, ElementRef, MappingError, NodeId, RelationshipId, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// STATE VALUES
// =============================================================================

/// A field value as served by `EntityState::get_property`.
pub enum StateValue<'a> {
    /// Scalar, indexed or computed value.
    Value(Value),
    /// Single-valued relationship, resolved on read.
    Single(Option<EntityRef>),
    /// Collection field, materialized on iteration.
    Sequence(LazySequence<'a>),
}

impl<'a> StateValue<'a> {
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_sequence(self) -> Option<LazySequence<'a>> {
        match self {
            Self::Sequence(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_single(self) -> Option<Option<EntityRef>> {
        match self {
            Self::Single(e) => Some(e),
            _ => None,
        }
    }
}

/// One item of a lazy sequence.
pub enum SequenceItem {
    Entity(EntityRef),
    Node(NodeId),
    Relationship(RelationshipId),
}

#[derive(Clone)]
enum Source {
    Relationships {
        node: NodeId,
        rel_type: String,
        direction: Direction,
    },
    Traversal {
        node: NodeId,
        description: TraversalDescription,
        element: TraversalElement,
    },
    Cached(Rc<Vec<ElementRef>>),
}

/// A restartable, uncached sequence over a collection field.
///
/// `iter()` reads the element list from the store on every call and
/// projects entities one at a time as the iterator advances.
#[derive(Clone)]
pub struct LazySequence<'a> {
    infra: &'a MappingInfrastructure,
    source: Source,
    /// Entity type to project into; `None` yields raw elements.
    target: Option<String>,
    policy: MappingPolicy,
    limit: Option<usize>,
}

impl<'a> LazySequence<'a> {
    /// The store elements currently backing the sequence.
    pub fn elements(&self) -> Result<Vec<ElementRef>, MappingError> {
        let mut elements = self.read_elements()?;
        if let Some(limit) = self.limit {
            elements.truncate(limit);
        }
        Ok(elements)
    }

    fn read_elements(&self) -> Result<Vec<ElementRef>, MappingError> {
        let db = self.infra.db();
        match &self.source {
            Source::Relationships {
                node,
                rel_type,
                direction,
            } => Ok(db
                .relationships(*node, Some(rel_type), *direction)?
                .iter()
                .map(|rel| ElementRef::Node(rel.other_node(*node)))
                .collect()),
            Source::Traversal {
                node,
                description,
                element,
            } => {
                let paths = db.traverse(*node, description)?;
                Ok(match element {
                    TraversalElement::Relationships => paths
                        .iter()
                        .filter_map(|p| p.last_relationship())
                        .map(ElementRef::Relationship)
                        .collect(),
                    TraversalElement::Entities(_) | TraversalElement::Nodes => paths
                        .iter()
                        .filter_map(|p| p.end_node())
                        .map(ElementRef::Node)
                        .collect(),
                })
            }
            Source::Cached(elements) => Ok(elements.as_ref().clone()),
        }
    }

    /// Start a new pass over the sequence.
    pub fn iter(&self) -> Result<SequenceIter<'a>, MappingError> {
        let elements = self.elements()?;
        trace!(items = elements.len(), target = ?self.target, "materializing sequence");
        Ok(SequenceIter {
            infra: self.infra,
            elements: elements.into_iter(),
            target: self.target.clone(),
            policy: self.policy.clone(),
        })
    }

    /// Project every item into an entity.
    pub fn entities(&self) -> Result<Vec<EntityRef>, MappingError> {
        self.iter()?
            .map(|item| match item? {
                SequenceItem::Entity(e) => Ok(e),
                SequenceItem::Node(n) => Err(MappingError::UnsupportedResult {
                    shape: format!("node({})", n.0),
                    target: "entity".into(),
                }),
                SequenceItem::Relationship(r) => Err(MappingError::UnsupportedResult {
                    shape: format!("relationship({})", r.0),
                    target: "entity".into(),
                }),
            })
            .collect()
    }

    /// The sequence as an in-memory field value.
    pub fn to_field_value(&self) -> Result<FieldValue, MappingError> {
        if self.target.is_some() {
            return Ok(FieldValue::Entities(self.entities()?));
        }
        let elements = self.elements()?;
        if let TraversalElement::Relationships = self.element_shape() {
            Ok(FieldValue::Relationships(
                elements.iter().filter_map(|e| e.as_relationship()).collect(),
            ))
        } else {
            Ok(FieldValue::Nodes(
                elements.iter().filter_map(|e| e.as_node()).collect(),
            ))
        }
    }

    fn element_shape(&self) -> TraversalElement {
        match &self.source {
            Source::Traversal { element, .. } => element.clone(),
            Source::Relationships { .. } | Source::Cached(_) => TraversalElement::Nodes,
        }
    }
}

/// One pass over a [`LazySequence`].
pub struct SequenceIter<'a> {
    infra: &'a MappingInfrastructure,
    elements: std::vec::IntoIter<ElementRef>,
    target: Option<String>,
    policy: MappingPolicy,
}

impl Iterator for SequenceIter<'_> {
    type Item = Result<SequenceItem, MappingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.elements.next()?;
        Some(match (&self.target, element) {
            (Some(target), element) => self
                .infra
                .persister()
                .project_to(element, target, &self.policy)
                .map(SequenceItem::Entity),
            (None, ElementRef::Node(n)) => Ok(SequenceItem::Node(n)),
            (None, ElementRef::Relationship(r)) => Ok(SequenceItem::Relationship(r)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.elements.size_hint()
    }
}

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Adapter over one bound instance.
pub struct EntityState<'a> {
    infra: &'a MappingInfrastructure,
    entity: EntityRef,
    element: ElementRef,
    mapped: Arc<MappedType>,
    read_only_cache: RefCell<BTreeMap<String, Rc<Vec<ElementRef>>>>,
}

impl<'a> EntityState<'a> {
    pub(crate) fn new(
        infra: &'a MappingInfrastructure,
        entity: EntityRef,
        element: ElementRef,
        mapped: Arc<MappedType>,
    ) -> Self {
        Self {
            infra,
            entity,
            element,
            mapped,
            read_only_cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// Bind to an instance that already has a persistent state.
    pub fn bind(infra: &'a MappingInfrastructure, entity: &EntityRef) -> Result<Self, MappingError> {
        let (type_name, element) = {
            let e = entity.borrow();
            (e.type_name().to_string(), e.persistent_state())
        };
        let element = element.ok_or_else(|| MappingError::Unbound(type_name.clone()))?;
        let mapped = infra.mapping_context().descriptor(&type_name)?;
        if element.kind() != mapped.kind {
            return Err(MappingError::KindMismatch {
                expected: mapped.kind,
                actual: element,
            });
        }
        Ok(Self::new(infra, Rc::clone(entity), element, mapped))
    }

    /// The bound store element.
    #[must_use]
    pub const fn persistent_state(&self) -> ElementRef {
        self.element
    }

    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    #[must_use]
    pub fn mapped_type(&self) -> &Arc<MappedType> {
        &self.mapped
    }

    fn ensure_live(&self) -> Result<(), MappingError> {
        if self.infra.db().contains(self.element)? {
            Ok(())
        } else {
            Err(MappingError::ElementRemoved(self.element))
        }
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<(), MappingError> {
        self.ensure_live()?;
        if self.infra.db().in_transaction() {
            Ok(())
        } else {
            Err(MappingError::NoTransaction(operation))
        }
    }

    fn node(&self) -> Result<NodeId, MappingError> {
        self.element.as_node().ok_or(MappingError::KindMismatch {
            expected: crate::ElementKind::Node,
            actual: self.element,
        })
    }

    // -------------------------------------------------------------------------
    // reads
    // -------------------------------------------------------------------------

    /// Read a field with the default mapping policy.
    pub fn get_property(&self, property: &PersistentProperty) -> Result<StateValue<'a>, MappingError> {
        self.get_property_with(property, &self.infra.config().default_policy)
    }

    /// Read a field; `policy` governs how related entities are projected.
    pub fn get_property_with(
        &self,
        property: &PersistentProperty,
        policy: &MappingPolicy,
    ) -> Result<StateValue<'a>, MappingError> {
        self.ensure_live()?;
        let db = self.infra.db();
        match &property.strategy {
            FieldStrategy::Scalar | FieldStrategy::Indexed(_) => {
                let stored = db.property(self.element, &property.name)?.unwrap_or_default();
                Ok(StateValue::Value(property.value_type.coerce(stored)?))
            }
            FieldStrategy::Computed(computer) => {
                Ok(StateValue::Value(computer.compute(db, self.element)?))
            }
            FieldStrategy::Relationship(spec) => {
                let sequence = self.relationship_sequence(property, spec, policy)?;
                match spec.cardinality {
                    Cardinality::Many => Ok(StateValue::Sequence(sequence)),
                    Cardinality::One => {
                        let first = sequence.elements()?.into_iter().next();
                        let entity = first
                            .map(|e| self.infra.persister().project_to(e, &spec.target, policy))
                            .transpose()?;
                        Ok(StateValue::Single(entity))
                    }
                }
            }
            FieldStrategy::Traversal(spec) => Ok(StateValue::Sequence(self.traversal_sequence(spec, policy)?)),
        }
    }

    /// The unprojected sequence behind a relationship or traversal field.
    ///
    /// Single-valued relationships yield at most one item.
    pub fn sequence(
        &self,
        property: &PersistentProperty,
        policy: &MappingPolicy,
    ) -> Result<Option<LazySequence<'a>>, MappingError> {
        self.ensure_live()?;
        match &property.strategy {
            FieldStrategy::Relationship(spec) => {
                Ok(Some(self.relationship_sequence(property, spec, policy)?))
            }
            FieldStrategy::Traversal(spec) => Ok(Some(self.traversal_sequence(spec, policy)?)),
            FieldStrategy::Scalar | FieldStrategy::Indexed(_) | FieldStrategy::Computed(_) => Ok(None),
        }
    }

    fn traversal_sequence(
        &self,
        spec: &TraversalSpec,
        policy: &MappingPolicy,
    ) -> Result<LazySequence<'a>, MappingError> {
        let node = self.node()?;
        let description = spec.builder.build(node, &spec.params);
        let target = match &spec.element {
            TraversalElement::Entities(t) => Some(t.clone()),
            TraversalElement::Nodes | TraversalElement::Relationships => None,
        };
        Ok(LazySequence {
            infra: self.infra,
            source: Source::Traversal {
                node,
                description,
                element: spec.element.clone(),
            },
            target,
            policy: policy.clone(),
            limit: None,
        })
    }

    fn relationship_sequence(
        &self,
        property: &PersistentProperty,
        spec: &RelationshipSpec,
        policy: &MappingPolicy,
    ) -> Result<LazySequence<'a>, MappingError> {
        let node = self.node()?;
        let mut source = Source::Relationships {
            node,
            rel_type: spec.rel_type.clone(),
            direction: spec.direction,
        };

        if spec.read_only {
            let cached = self.read_only_cache.borrow().get(&property.name).cloned();
            let elements = match cached {
                Some(elements) => elements,
                None => {
                    let sequence = LazySequence {
                        infra: self.infra,
                        source,
                        target: None,
                        policy: policy.clone(),
                        limit: None,
                    };
                    let elements = Rc::new(sequence.elements()?);
                    self.read_only_cache
                        .borrow_mut()
                        .insert(property.name.clone(), Rc::clone(&elements));
                    elements
                }
            };
            source = Source::Cached(elements);
        }

        let mut sequence = LazySequence {
            infra: self.infra,
            source,
            target: Some(spec.target.clone()),
            policy: policy.clone(),
            limit: None,
        };
        if spec.cardinality == Cardinality::One {
            sequence.limit = Some(1);
        }
        Ok(sequence)
    }

    // -------------------------------------------------------------------------
    // writes
    // -------------------------------------------------------------------------

    /// Write a field inside the active unit of work.
    pub fn set_property(
        &self,
        property: &PersistentProperty,
        value: FieldValue,
    ) -> Result<(), MappingError> {
        self.ensure_writable("set_property")?;
        if property.is_read_only() {
            return Err(MappingError::ReadOnlyField {
                type_name: self.mapped.name.clone(),
                field: property.name.clone(),
            });
        }

        match &property.strategy {
            FieldStrategy::Scalar => {
                let value = self.scalar(property, value)?;
                self.write_value(&property.name, value)
            }
            FieldStrategy::Indexed(spec) => {
                let value = self.scalar(property, value)?;
                let db = self.infra.db();
                let previous = db.property(self.element, &property.name)?.unwrap_or_default();
                if previous == value {
                    return Ok(());
                }
                let provider = IndexProvider::new(db);
                let target = provider.resolve(spec, &self.mapped);
                provider.remove(&target, &previous, self.element)?;
                self.write_value(&property.name, value.clone())?;
                provider.index(&target, &value, self.element)
            }
            FieldStrategy::Relationship(spec) => {
                let targets: Vec<EntityRef> = match value {
                    FieldValue::Entity(single) => single.into_iter().collect(),
                    FieldValue::Entities(many) => many,
                    other => {
                        return Err(MappingError::TypeMismatch {
                            expected: property.value_type.to_string(),
                            actual: other.shape().to_string(),
                        });
                    }
                };
                self.sync_relationships(spec, &targets)
            }
            FieldStrategy::Traversal(_) | FieldStrategy::Computed(_) => {
                Err(MappingError::ReadOnlyField {
                    type_name: self.mapped.name.clone(),
                    field: property.name.clone(),
                })
            }
        }
    }

    fn scalar(&self, property: &PersistentProperty, value: FieldValue) -> Result<Value, MappingError> {
        match value {
            FieldValue::Value(v) => property.value_type.coerce(v),
            other => Err(MappingError::TypeMismatch {
                expected: property.value_type.to_string(),
                actual: other.shape().to_string(),
            }),
        }
    }

    fn write_value(&self, key: &str, value: Value) -> Result<(), MappingError> {
        let db = self.infra.db();
        if value.is_null() {
            db.remove_property(self.element, key)?;
        } else {
            db.set_property(self.element, key, value)?;
        }
        Ok(())
    }

    /// Bound node of `entity`, checked against the relationship target type.
    fn target_node(&self, entity: &EntityRef, target_type: &str) -> Result<NodeId, MappingError> {
        let (type_name, element) = {
            let e = entity.borrow();
            (e.type_name().to_string(), e.persistent_state())
        };
        let mapped = self.infra.mapping_context().descriptor(&type_name)?;
        if !mapped.is_a(target_type) {
            return Err(MappingError::TypeMismatch {
                expected: target_type.to_string(),
                actual: type_name,
            });
        }
        let element = element.ok_or(MappingError::Unbound(type_name))?;
        element.as_node().ok_or(MappingError::KindMismatch {
            expected: crate::ElementKind::Node,
            actual: element,
        })
    }

    fn sync_relationships(
        &self,
        spec: &RelationshipSpec,
        targets: &[EntityRef],
    ) -> Result<(), MappingError> {
        let node = self.node()?;
        let db = self.infra.db();

        let desired: BTreeSet<NodeId> = targets
            .iter()
            .map(|t| self.target_node(t, &spec.target))
            .collect::<Result<_, _>>()?;

        let mut present = BTreeSet::new();
        for rel in db.relationships(node, Some(&spec.rel_type), spec.direction)? {
            let other = rel.other_node(node);
            if desired.contains(&other) && present.insert(other) {
                continue;
            }
            db.delete_relationship(rel.id)?;
            debug!(element = %self.element, rel_type = %spec.rel_type, other = other.0, "relationship removed");
        }

        for other in desired.difference(&present) {
            let (start, end) = match spec.direction {
                Direction::Incoming => (*other, node),
                Direction::Outgoing | Direction::Both => (node, *other),
            };
            db.create_relationship(start, end, &spec.rel_type)?;
            debug!(element = %self.element, rel_type = %spec.rel_type, other = other.0, "relationship created");
        }
        Ok(())
    }

    /// Create an outgoing relationship to `other`, reusing an existing one.
    pub fn create_relationship_to(
        &self,
        other: &EntityRef,
        rel_type: &str,
    ) -> Result<RelationshipId, MappingError> {
        self.ensure_writable("create_relationship_to")?;
        let node = self.node()?;
        let other_node = self.other_node(other)?;
        let db = self.infra.db();
        if let Some(existing) = db
            .relationships(node, Some(rel_type), Direction::Outgoing)?
            .into_iter()
            .find(|r| r.end == other_node)
        {
            return Ok(existing.id);
        }
        Ok(db.create_relationship(node, other_node, rel_type)?)
    }

    /// Remove outgoing relationships of `rel_type` to `other`.
    pub fn remove_relationship_to(
        &self,
        other: &EntityRef,
        rel_type: &str,
    ) -> Result<bool, MappingError> {
        self.ensure_writable("remove_relationship_to")?;
        let node = self.node()?;
        let other_node = self.other_node(other)?;
        let db = self.infra.db();
        let mut removed = false;
        for rel in db.relationships(node, Some(rel_type), Direction::Outgoing)? {
            if rel.end == other_node {
                db.delete_relationship(rel.id)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    fn other_node(&self, other: &EntityRef) -> Result<NodeId, MappingError> {
        let (type_name, element) = {
            let e = other.borrow();
            (e.type_name().to_string(), e.persistent_state())
        };
        let element = element.ok_or(MappingError::Unbound(type_name))?;
        if !self.infra.db().contains(element)? {
            return Err(MappingError::ElementRemoved(element));
        }
        element.as_node().ok_or(MappingError::KindMismatch {
            expected: crate::ElementKind::Node,
            actual: element,
        })
    }
}
