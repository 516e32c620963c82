//! Shared fixtures: a Group/Person/Friendship schema over the in-memory store.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_core::mapping::{DegreeComputer, RelationshipTypeTraversal};
use trellis_core::{
    Direction, DynamicEntity, ElementRef, Entity, EntityRef, FieldDeclaration, FieldValue,
    GraphDatabase, IndexDeclaration, IndexScope, MappingConfig, MappingError,
    MappingInfrastructure, MemoryGraph, Qualifier, Target, TypeDeclaration, TypeRegistry, Value,
    ValueType, ViewDeclaration, entity_ref,
};

// =============================================================================
// TYPED PERSON
// =============================================================================

/// A hand-written mapped type: scalars in struct fields, related fields in a map.
#[derive(Default)]
pub struct Person {
    pub element: Option<ElementRef>,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub related: BTreeMap<String, FieldValue>,
}

impl Entity for Person {
    fn type_name(&self) -> &str {
        "Person"
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => self.name.clone().map(|n| FieldValue::Value(Value::Text(n))),
            "age" => self.age.map(|a| FieldValue::Value(Value::Int(a))),
            other => self.related.get(other).cloned(),
        }
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), MappingError> {
        match (name, value) {
            ("name", FieldValue::Value(Value::Text(n))) => self.name = Some(n),
            ("age", FieldValue::Value(Value::Int(a))) => self.age = Some(a),
            ("name" | "age", FieldValue::Value(Value::Null)) => {}
            ("name" | "age", other) => {
                return Err(MappingError::TypeMismatch {
                    expected: "scalar".into(),
                    actual: other.shape().into(),
                });
            }
            (other, value) => {
                self.related.insert(other.to_string(), value);
            }
        }
        Ok(())
    }

    fn persistent_state(&self) -> Option<ElementRef> {
        self.element
    }

    fn set_persistent_state(&mut self, element: Option<ElementRef>) {
        self.element = element;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            TypeDeclaration::node("Group", DynamicEntity::factory("Group"))
                .field(
                    FieldDeclaration::new("name", ValueType::Text)
                        .indexed(IndexDeclaration::default()),
                )
                .field(
                    FieldDeclaration::new("title", ValueType::Text)
                        .indexed(IndexDeclaration::default().named("GroupTitles").fulltext()),
                )
                .field(
                    FieldDeclaration::new("members", ValueType::Entities("Person".into()))
                        .related_to("persons", Direction::Outgoing),
                )
                .field(FieldDeclaration::new("memberCount", ValueType::Int).with(
                    Qualifier::Computed(Arc::new(DegreeComputer {
                        rel_type: Some("persons".into()),
                        direction: Direction::Outgoing,
                    })),
                ))
                .field(FieldDeclaration::new("scratch", ValueType::Text).with(Qualifier::Transient))
                // Enum-valued collections map onto lists of their constant names.
                .field(FieldDeclaration::new("roles", ValueType::List(Box::new(ValueType::Text)))),
        )
        .register(
            TypeDeclaration::node("SubGroup", DynamicEntity::factory("SubGroup")).extends("Group"),
        )
        .register(
            TypeDeclaration::node("Person", Arc::new(|| entity_ref(Person::default())))
                .field(
                    FieldDeclaration::new("name", ValueType::Text)
                        .indexed(IndexDeclaration::default().level(IndexScope::Global)),
                )
                .field(FieldDeclaration::new("age", ValueType::Int))
                .field(FieldDeclaration::new("boss", ValueType::Entity("Person".into())))
                .field(
                    FieldDeclaration::new("friends", ValueType::Entities("Person".into()))
                        .related_to("knows", Direction::Outgoing),
                )
                .field(
                    FieldDeclaration::new("groups", ValueType::Entities("Group".into())).with(
                        Qualifier::RelatedTo {
                            rel_type: Some("persons".into()),
                            direction: Direction::Incoming,
                            read_only: true,
                        },
                    ),
                )
                .field(
                    FieldDeclaration::new("reachable", ValueType::Entities("Person".into())).with(
                        Qualifier::GraphTraversal {
                            builder: Arc::new(RelationshipTypeTraversal::new(
                                "knows",
                                Direction::Outgoing,
                            )),
                            params: Vec::new(),
                        },
                    ),
                ),
        )
        .register(
            TypeDeclaration::relationship(
                "Friendship",
                "knows",
                DynamicEntity::factory("Friendship"),
            )
            .field(FieldDeclaration::new("years", ValueType::Int))
            .field(
                FieldDeclaration::new("person1", ValueType::Entity("Person".into()))
                    .with(Qualifier::StartNode),
            )
            .field(
                FieldDeclaration::new("person2", ValueType::Entity("Person".into()))
                    .with(Qualifier::EndNode),
            ),
        )
        .register_view(
            ViewDeclaration::new("GroupSummary")
                .accessor("group", Target::Entity("Group".into()))
                .column("size", "count(p)", Target::Value(ValueType::Int)),
        );
    registry
}

pub fn infra_on(db: Arc<dyn GraphDatabase>) -> MappingInfrastructure {
    MappingInfrastructure::new(db, Arc::new(registry()), MappingConfig::default())
}

pub fn infra() -> MappingInfrastructure {
    infra_on(Arc::new(MemoryGraph::new()))
}

// =============================================================================
// INSTANCES
// =============================================================================

pub fn person(name: &str, age: i64) -> EntityRef {
    entity_ref(Person {
        name: Some(name.to_string()),
        age: Some(age),
        ..Person::default()
    })
}

pub fn group(name: &str, title: &str, members: Vec<EntityRef>) -> EntityRef {
    entity_ref(
        DynamicEntity::new("Group")
            .with("name", Value::from(name))
            .with("title", Value::from(title))
            .with("members", FieldValue::Entities(members)),
    )
}

/// Text value of a loaded field.
pub fn text(entity: &EntityRef, field: &str) -> Option<String> {
    entity
        .borrow()
        .field(field)?
        .as_value()?
        .as_str()
        .map(str::to_string)
}

/// First related entity of a loaded relationship field.
pub fn first(entity: &EntityRef, field: &str) -> Option<EntityRef> {
    match entity.borrow().field(field)? {
        FieldValue::Entities(items) => items.into_iter().next(),
        FieldValue::Entity(single) => single,
        _ => None,
    }
}

/// Sorted `name` fields of `entities`.
pub fn names(entities: &[EntityRef]) -> Vec<String> {
    let mut names: Vec<String> = entities.iter().filter_map(|e| text(e, "name")).collect();
    names.sort();
    names
}
