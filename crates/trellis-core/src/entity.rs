//! # Entities
//!
//! The instance side of the mapping: the `Entity` trait mapped types
//! implement, shared instance handles and the schema-driven `DynamicEntity`.
//!
//! Instances are shared through `EntityRef` (`Rc<RefCell<dyn Entity>>`) so a
//! cyclic object graph (A knows B, B knows A) can hold the same instance on
//! both ends. An entity knows nothing about the store beyond its binding;
//! relationship and traversal fields are served lazily by
//! [`crate::state::EntityState`].

use crate::{ElementRef, MappingError, NodeId, RelationshipId, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to a mapped instance.
pub type EntityRef = Rc<RefCell<dyn Entity>>;

/// Creates a fresh, unbound instance of one mapped type.
pub type EntityFactory = Arc<dyn Fn() -> EntityRef + Send + Sync>;

// =============================================================================
// FIELD VALUES
// =============================================================================

/// The in-memory value of one mapped field.
#[derive(Clone)]
pub enum FieldValue {
    /// Scalar or list property value.
    Value(Value),
    /// Single related entity (`None` = no relationship).
    Entity(Option<EntityRef>),
    /// Related entities of a collection field.
    Entities(Vec<EntityRef>),
    /// Raw nodes of a traversal field.
    Nodes(Vec<NodeId>),
    /// Raw relationships of a traversal field.
    Relationships(Vec<RelationshipId>),
}

impl FieldValue {
    /// Short name of the value's shape.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Entity(_) => "entity",
            Self::Entities(_) => "entities",
            Self::Nodes(_) => "nodes",
            Self::Relationships(_) => "relationships",
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for FieldValue {
    // Entities are printed by type and binding only; following them would
    // recurse forever on cyclic graphs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Entity(e) => f
                .debug_tuple("Entity")
                .field(&e.as_ref().map(describe))
                .finish(),
            Self::Entities(items) => f
                .debug_tuple("Entities")
                .field(&items.iter().map(describe).collect::<Vec<_>>())
                .finish(),
            Self::Nodes(nodes) => f.debug_tuple("Nodes").field(nodes).finish(),
            Self::Relationships(rels) => f.debug_tuple("Relationships").field(rels).finish(),
        }
    }
}

fn describe(entity: &EntityRef) -> String {
    match entity.try_borrow() {
        Ok(e) => match e.persistent_state() {
            Some(element) => format!("{}@{}", e.type_name(), element),
            None => format!("{}@unbound", e.type_name()),
        },
        Err(_) => "<borrowed>".to_string(),
    }
}

// =============================================================================
// ENTITY TRAIT
// =============================================================================

/// A mapped domain instance.
///
/// `field` returns `None` for a field that has not been loaded; the persister
/// leaves such fields untouched in the store.
pub trait Entity: Any {
    /// Name of the mapped type this instance belongs to.
    fn type_name(&self) -> &str;

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), MappingError>;

    /// The bound store element, if any.
    fn persistent_state(&self) -> Option<ElementRef>;

    fn set_persistent_state(&mut self, element: Option<ElementRef>);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Wrap an instance into a shared handle.
pub fn entity_ref<E: Entity>(entity: E) -> EntityRef {
    Rc::new(RefCell::new(entity))
}

/// Run `f` against the concrete instance behind `entity`, if it is an `E`.
pub fn with_entity<E: Entity, R>(entity: &EntityRef, f: impl FnOnce(&E) -> R) -> Option<R> {
    let borrowed = entity.borrow();
    borrowed.as_any().downcast_ref::<E>().map(f)
}

/// Mutable variant of [`with_entity`].
pub fn with_entity_mut<E: Entity, R>(
    entity: &EntityRef,
    f: impl FnOnce(&mut E) -> R,
) -> Option<R> {
    let mut borrowed = entity.borrow_mut();
    borrowed.as_any_mut().downcast_mut::<E>().map(f)
}

/// Instance identity: true when both handles point at the same instance.
pub fn same_entity(a: &EntityRef, b: &EntityRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Stable identity key of an instance for visited sets.
pub(crate) fn identity(entity: &EntityRef) -> *const () {
    Rc::as_ptr(entity).cast::<()>()
}

// =============================================================================
// DYNAMIC ENTITY
// =============================================================================

/// A schema-driven instance holding its fields in a map.
///
/// Used for types declared at runtime (the CLI schema) and in tests. It
/// accepts any field name; validation against the declaration happens in
/// the mapping layer.
#[derive(Debug, Clone)]
pub struct DynamicEntity {
    type_name: String,
    element: Option<ElementRef>,
    fields: BTreeMap<String, FieldValue>,
}

impl DynamicEntity {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            element: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Loaded fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Factory producing empty instances of `type_name`.
    #[must_use]
    pub fn factory(type_name: impl Into<String>) -> EntityFactory {
        let type_name: String = type_name.into();
        Arc::new(move || entity_ref(Self::new(type_name.clone())))
    }
}

impl Entity for DynamicEntity {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), MappingError> {
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    fn persistent_state(&self) -> Option<ElementRef> {
        self.element
    }

    fn set_persistent_state(&mut self, element: Option<ElementRef>) {
        self.element = element;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_entity_fields_and_binding() {
        let entity = entity_ref(DynamicEntity::new("Person").with("name", Value::from("ada")));
        assert_eq!(entity.borrow().type_name(), "Person");
        assert!(entity.borrow().persistent_state().is_none());
        assert!(entity.borrow().field("age").is_none());

        entity
            .borrow_mut()
            .set_persistent_state(Some(ElementRef::Node(NodeId(4))));
        assert_eq!(
            entity.borrow().persistent_state(),
            Some(ElementRef::Node(NodeId(4)))
        );

        let name = with_entity(&entity, |e: &DynamicEntity| {
            e.get("name").and_then(FieldValue::as_value).cloned()
        });
        assert_eq!(name, Some(Some(Value::from("ada"))));
    }

    #[test]
    fn identity_distinguishes_instances() {
        let factory = DynamicEntity::factory("Group");
        let a = factory();
        let b = factory();
        let a2 = Rc::clone(&a);

        assert!(same_entity(&a, &a2));
        assert!(!same_entity(&a, &b));
        assert_eq!(identity(&a), identity(&a2));
    }

    #[test]
    fn debug_does_not_follow_cycles() {
        let a = entity_ref(DynamicEntity::new("Person"));
        let b = entity_ref(DynamicEntity::new("Person"));
        a.borrow_mut()
            .set_field("friend", FieldValue::Entity(Some(Rc::clone(&b))))
            .expect("set");
        b.borrow_mut()
            .set_field("friend", FieldValue::Entity(Some(Rc::clone(&a))))
            .expect("set");

        let rendered = format!("{:?}", a.borrow().field("friend"));
        assert!(rendered.contains("Person@unbound"));
    }
}
