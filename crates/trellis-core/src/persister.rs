//! # Entity Persister
//!
//! Loads store elements into instances (`project_to`) and writes instances
//! back (`persist`).
//!
//! Both directions are cycle-safe: a projection keeps a per-call identity
//! map from element to instance, and a persist keeps a per-call visited set
//! keyed by instance identity. Instances are bound before their relationship
//! fields are followed, so a cycle always finds its way back to an already
//! bound instance.

use crate::entity::{EntityRef, FieldValue, identity};
use crate::index::IndexProvider;
use crate::infrastructure::MappingInfrastructure;
use crate::mapping::{Cardinality, FieldStrategy, MappedType, TraversalElement};
use crate::primitives::MAX_EAGER_DEPTH;
use crate::state::{EntityState, StateValue};
use crate::{ElementKind, ElementRef, MappingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// MAPPING POLICY
// =============================================================================

/// Eagerness and depth of related-entity population on load.
///
/// The default loads scalar fields only; relationship and traversal fields
/// stay lazy behind [`EntityState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingPolicy {
    /// Populate relationship and traversal fields on load.
    pub eager_relationships: bool,
    /// Relationship levels populated under an eager policy.
    pub depth: usize,
}

impl Default for MappingPolicy {
    fn default() -> Self {
        Self {
            eager_relationships: false,
            depth: 1,
        }
    }
}

impl MappingPolicy {
    /// Lazy policy: scalars only.
    #[must_use]
    pub fn lazy() -> Self {
        Self::default()
    }

    /// Eager policy populating `depth` relationship levels.
    #[must_use]
    pub fn eager(depth: usize) -> Self {
        Self {
            eager_relationships: true,
            depth: depth.min(MAX_EAGER_DEPTH),
        }
    }
}

// =============================================================================
// PERSISTER
// =============================================================================

pub struct EntityPersister<'a> {
    infra: &'a MappingInfrastructure,
}

impl<'a> EntityPersister<'a> {
    pub fn new(infra: &'a MappingInfrastructure) -> Self {
        Self { infra }
    }

    // -------------------------------------------------------------------------
    // classification
    // -------------------------------------------------------------------------

    pub fn is_node_entity(&self, type_name: &str) -> Result<bool, MappingError> {
        Ok(self.infra.mapping_context().descriptor(type_name)?.is_node_entity())
    }

    pub fn is_relationship_entity(&self, type_name: &str) -> Result<bool, MappingError> {
        Ok(self
            .infra
            .mapping_context()
            .descriptor(type_name)?
            .is_relationship_entity())
    }

    /// Entity state of a bound instance.
    pub fn entity_state(&self, entity: &EntityRef) -> Result<EntityState<'a>, MappingError> {
        EntityState::bind(self.infra, entity)
    }

    // -------------------------------------------------------------------------
    // load
    // -------------------------------------------------------------------------

    /// Load `element` as `type_name` (or a recorded subtype).
    pub fn project_to(
        &self,
        element: ElementRef,
        type_name: &str,
        policy: &MappingPolicy,
    ) -> Result<EntityRef, MappingError> {
        let requested = self.infra.mapping_context().descriptor(type_name)?;
        let mut projection = Projection {
            infra: self.infra,
            policy,
            seen: BTreeMap::new(),
        };
        let depth = if policy.eager_relationships {
            policy.depth.min(MAX_EAGER_DEPTH)
        } else {
            0
        };
        let entity = projection.load(element, &requested, depth)?;
        debug!(%element, type_name, loaded = projection.seen.len(), "projected");
        Ok(entity)
    }

    /// Load `element` as its recorded type.
    pub fn project(&self, element: ElementRef, policy: &MappingPolicy) -> Result<EntityRef, MappingError> {
        let recorded = self
            .infra
            .type_representation()
            .read_type(element)?
            .ok_or(MappingError::Unrecorded(element))?;
        self.project_to(element, &recorded, policy)
    }

    /// All instances of `type_name` and its subtypes, projected as iterated.
    pub fn find_all(
        &self,
        type_name: &str,
        policy: &MappingPolicy,
    ) -> Result<impl Iterator<Item = Result<EntityRef, MappingError>> + use<'a>, MappingError> {
        let mapped = self.infra.mapping_context().descriptor(type_name)?;
        let elements = self.infra.type_representation().find_all(&mapped)?;
        let persister = EntityPersister::new(self.infra);
        let policy = policy.clone();
        Ok(elements.map(move |element| persister.project_to(element, &mapped.name, &policy)))
    }

    pub fn count(&self, type_name: &str) -> Result<usize, MappingError> {
        let mapped = self.infra.mapping_context().descriptor(type_name)?;
        self.infra.type_representation().count(&mapped)
    }

    /// Instances of `type_name` whose indexed `field` equals `value`.
    pub fn lookup(
        &self,
        type_name: &str,
        field: &str,
        value: &crate::Value,
        policy: &MappingPolicy,
    ) -> Result<Vec<EntityRef>, MappingError> {
        let mapped = self.infra.mapping_context().descriptor(type_name)?;
        let property = mapped.require_property(field)?;
        let spec = property.index().ok_or_else(|| {
            MappingError::invalid(type_name, format!("field {field} is not indexed"))
        })?;
        let provider = IndexProvider::new(self.infra.db());
        let target = provider.resolve(spec, &mapped);
        let hits: Vec<ElementRef> = provider.query(&target.name, &target.key, value)?.collect();
        self.project_matching(&mapped, hits, policy)
    }

    /// Instances of `type_name` matching a full-text `query` on `field`.
    ///
    /// Terms without an explicit `key:` are restricted to the field's key.
    pub fn search(
        &self,
        type_name: &str,
        field: &str,
        query: &str,
        policy: &MappingPolicy,
    ) -> Result<Vec<EntityRef>, MappingError> {
        let mapped = self.infra.mapping_context().descriptor(type_name)?;
        let property = mapped.require_property(field)?;
        let spec = property.index().ok_or_else(|| {
            MappingError::invalid(type_name, format!("field {field} is not indexed"))
        })?;
        let provider = IndexProvider::new(self.infra.db());
        let target = provider.resolve(spec, &mapped);
        let expression = query
            .split_whitespace()
            .map(|term| {
                if term.contains(':') {
                    term.to_string()
                } else {
                    format!("{}:{}", target.key, term)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        let hits: Vec<ElementRef> = provider.query_fulltext(&target.name, &expression)?.collect();
        self.project_matching(&mapped, hits, policy)
    }

    /// Project index hits, skipping elements recorded as unrelated types
    /// (global indexes are shared across types).
    fn project_matching(
        &self,
        mapped: &MappedType,
        hits: Vec<ElementRef>,
        policy: &MappingPolicy,
    ) -> Result<Vec<EntityRef>, MappingError> {
        let mut result = Vec::with_capacity(hits.len());
        for element in hits {
            if element.kind() != mapped.kind {
                continue;
            }
            if let Some(recorded) = self.infra.type_representation().read_type(element)? {
                let recorded = self.infra.mapping_context().descriptor(&recorded)?;
                if !recorded.is_a(&mapped.name) {
                    continue;
                }
            }
            result.push(self.project_to(element, &mapped.name, policy)?);
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // save
    // -------------------------------------------------------------------------

    /// Write `entity` and its unbound related instances to the store.
    pub fn persist(&self, entity: &EntityRef) -> Result<ElementRef, MappingError> {
        if !self.infra.db().in_transaction() {
            return Err(MappingError::NoTransaction("persist"));
        }
        let mut save = Save {
            infra: self.infra,
            visited: BTreeMap::new(),
        };
        let element = save.save(entity)?;
        debug!(%element, saved = save.visited.len(), "persisted");
        Ok(element)
    }
}

// =============================================================================
// PROJECTION
// =============================================================================

struct Projection<'p, 'a> {
    infra: &'a MappingInfrastructure,
    policy: &'p MappingPolicy,
    seen: BTreeMap<ElementRef, EntityRef>,
}

impl Projection<'_, '_> {
    fn load(
        &mut self,
        element: ElementRef,
        requested: &Arc<MappedType>,
        depth: usize,
    ) -> Result<EntityRef, MappingError> {
        if let Some(existing) = self.seen.get(&element) {
            return Ok(Rc::clone(existing));
        }

        let instantiated = self
            .infra
            .instantiator(requested.kind)
            .create(element, requested)?;
        let entity = instantiated.entity;
        let mapped = instantiated.mapped;
        self.seen.insert(element, Rc::clone(&entity));

        let state = EntityState::new(self.infra, Rc::clone(&entity), element, Arc::clone(&mapped));
        let mut loaded: Vec<(String, FieldValue)> = Vec::new();

        for property in &mapped.properties {
            match &property.strategy {
                FieldStrategy::Scalar | FieldStrategy::Indexed(_) | FieldStrategy::Computed(_) => {
                    if let StateValue::Value(v) = state.get_property_with(property, self.policy)? {
                        loaded.push((property.name.clone(), FieldValue::Value(v)));
                    }
                }
                FieldStrategy::Relationship(spec) if depth > 0 => {
                    let target = self.infra.mapping_context().descriptor(&spec.target)?;
                    let elements = match state.sequence(property, self.policy)? {
                        Some(sequence) => sequence.elements()?,
                        None => Vec::new(),
                    };
                    let mut related = Vec::with_capacity(elements.len());
                    for e in elements {
                        related.push(self.load(e, &target, depth - 1)?);
                    }
                    let value = match spec.cardinality {
                        Cardinality::Many => FieldValue::Entities(related),
                        Cardinality::One => FieldValue::Entity(related.into_iter().next()),
                    };
                    loaded.push((property.name.clone(), value));
                }
                FieldStrategy::Traversal(spec) if depth > 0 => {
                    let Some(sequence) = state.sequence(property, self.policy)? else {
                        continue;
                    };
                    let value = match &spec.element {
                        TraversalElement::Entities(target) => {
                            let target = self.infra.mapping_context().descriptor(target)?;
                            let mut related = Vec::new();
                            for e in sequence.elements()? {
                                related.push(self.load(e, &target, depth - 1)?);
                            }
                            FieldValue::Entities(related)
                        }
                        TraversalElement::Nodes | TraversalElement::Relationships => {
                            sequence.to_field_value()?
                        }
                    };
                    loaded.push((property.name.clone(), value));
                }
                FieldStrategy::Relationship(_) | FieldStrategy::Traversal(_) => {}
            }
        }

        // Relationship entities always carry their endpoints.
        if let (ElementRef::Relationship(rel_id), Some(start), Some(end)) =
            (element, &mapped.start_node, &mapped.end_node)
        {
            let rel = self
                .infra
                .db()
                .relationship(rel_id)?
                .ok_or(MappingError::ElementRemoved(element))?;
            for (field, node) in [(start, rel.start), (end, rel.end)] {
                let target = self.infra.mapping_context().descriptor(&field.target)?;
                let endpoint = self.load(ElementRef::Node(node), &target, 0)?;
                loaded.push((field.name.clone(), FieldValue::Entity(Some(endpoint))));
            }
        }

        {
            let mut instance = entity.borrow_mut();
            for (name, value) in loaded {
                instance.set_field(&name, value)?;
            }
        }
        Ok(entity)
    }
}

// =============================================================================
// SAVE
// =============================================================================

struct Save<'a> {
    infra: &'a MappingInfrastructure,
    visited: BTreeMap<*const (), ElementRef>,
}

impl Save<'_> {
    fn save(&mut self, entity: &EntityRef) -> Result<ElementRef, MappingError> {
        let key = identity(entity);
        if let Some(element) = self.visited.get(&key) {
            return Ok(*element);
        }

        let (type_name, bound) = {
            let e = entity.borrow();
            (e.type_name().to_string(), e.persistent_state())
        };
        let mapped = self.infra.mapping_context().descriptor(&type_name)?;

        let element = match bound {
            Some(element) => {
                if !self.infra.db().contains(element)? {
                    return Err(MappingError::ElementRemoved(element));
                }
                element
            }
            None => self.create_element(entity, &mapped)?,
        };
        self.visited.insert(key, element);

        let state = EntityState::new(self.infra, Rc::clone(entity), element, Arc::clone(&mapped));
        for property in &mapped.properties {
            if property.is_read_only() {
                continue;
            }
            // Absent means not loaded: leave the store untouched.
            let Some(value) = entity.borrow().field(&property.name) else {
                continue;
            };
            if let FieldStrategy::Relationship(_) = property.strategy {
                self.cascade(&value)?;
            }
            state.set_property(property, value)?;
        }
        Ok(element)
    }

    /// Persist unbound related instances; bound ones are left as they are.
    fn cascade(&mut self, value: &FieldValue) -> Result<(), MappingError> {
        let targets: Vec<EntityRef> = match value {
            FieldValue::Entity(Some(e)) => vec![Rc::clone(e)],
            FieldValue::Entities(many) => many.iter().map(Rc::clone).collect(),
            _ => Vec::new(),
        };
        for target in targets {
            let unbound = target.borrow().persistent_state().is_none();
            if unbound {
                self.save(&target)?;
            }
        }
        Ok(())
    }

    fn create_element(&mut self, entity: &EntityRef, mapped: &MappedType) -> Result<ElementRef, MappingError> {
        let db = self.infra.db();
        let element = match mapped.kind {
            ElementKind::Node => ElementRef::Node(db.create_node()?),
            ElementKind::Relationship => {
                let mut endpoints = Vec::with_capacity(2);
                for field in [&mapped.start_node, &mapped.end_node].into_iter().flatten() {
                    let endpoint = entity.borrow().field(&field.name);
                    let Some(FieldValue::Entity(Some(node_entity))) = endpoint else {
                        return Err(MappingError::invalid(
                            &mapped.name,
                            format!("endpoint field {} is not set", field.name),
                        ));
                    };
                    // Bound endpoints are referenced, not rewritten.
                    let bound = node_entity.borrow().persistent_state();
                    let node = match bound {
                        Some(element) => {
                            if !db.contains(element)? {
                                return Err(MappingError::ElementRemoved(element));
                            }
                            element
                        }
                        None => self.save(&node_entity)?,
                    };
                    let node = node.as_node().ok_or(MappingError::KindMismatch {
                        expected: ElementKind::Node,
                        actual: node,
                    })?;
                    endpoints.push(node);
                }
                let (Some(start), Some(end), Some(rel_type)) = (
                    endpoints.first().copied(),
                    endpoints.get(1).copied(),
                    mapped.relationship_type.as_deref(),
                ) else {
                    return Err(MappingError::invalid(
                        &mapped.name,
                        "relationship entity is missing endpoints",
                    ));
                };
                ElementRef::Relationship(db.create_relationship(start, end, rel_type)?)
            }
        };
        self.infra.type_representation().record_type(element, mapped)?;
        entity.borrow_mut().set_persistent_state(Some(element));
        debug!(%element, type_name = %mapped.name, "created element");
        Ok(element)
    }
}
