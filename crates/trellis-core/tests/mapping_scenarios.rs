//! # Mapping Scenarios
//!
//! End-to-end behavior of the mapping core: the Group/Person schema, cyclic
//! object graphs, relationship entities, result conversion, removal, units
//! of work and the redb-backed store.

mod common;

use common::{first, group, infra, infra_on, names, person, text};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use trellis_core::query::Row;
use trellis_core::{
    Direction, DynamicEntity, ElementKind, ElementRef, EntityRef, ErrorKind, FieldDeclaration,
    FieldValue, GraphDatabase, MappingConfig, MappingContext, MappingError, MappingInfrastructure,
    MappingPolicy, MemoryGraph, Qualifier, Query, QueryEngine, RawValue, RedbGraph, Target,
    TraversalDescription, TypeDeclaration, TypeRegistry, TypeRepresentationKind, Value, ValueType,
    entity_ref, same_entity,
};

// =============================================================================
// GROUP / PERSON
// =============================================================================

mod group_person {
    use super::*;

    #[test]
    fn members_are_served_lazily_from_the_store() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 41);
        let graphs = group("graphs", "Graph Databases", vec![Rc::clone(&alice), Rc::clone(&bob)]);

        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&graphs))
            .expect("persist");
        assert!(alice.borrow().persistent_state().is_some());
        assert_eq!(infra.db().relationship_count().expect("count"), 2);

        let loaded = infra
            .persister()
            .project_to(element, "Group", &MappingPolicy::lazy())
            .expect("project");
        assert_eq!(text(&loaded, "name").as_deref(), Some("graphs"));
        assert!(loaded.borrow().field("members").is_none());
        assert!(loaded.borrow().field("scratch").is_none());

        let group_type = infra.mapping_context().descriptor("Group").expect("descriptor");
        let state = infra.persister().entity_state(&loaded).expect("state");
        let members = state
            .get_property(group_type.require_property("members").expect("members"))
            .expect("read")
            .into_sequence()
            .expect("sequence");
        assert_eq!(names(&members.entities().expect("entities")), vec!["alice", "bob"]);

        let count = state
            .get_property(group_type.require_property("memberCount").expect("count"))
            .expect("read");
        assert_eq!(count.as_value(), Some(&Value::Int(2)));

        // Every pass queries the store again.
        infra
            .in_unit_of_work(|i| {
                let carol = person("carol", 25);
                i.persister().persist(&carol)?;
                i.persister()
                    .entity_state(&loaded)?
                    .create_relationship_to(&carol, "persons")?;
                Ok(())
            })
            .expect("add member");
        assert_eq!(members.elements().expect("elements").len(), 3);
        assert_eq!(members.iter().expect("iter").count(), 3);
    }

    #[test]
    fn removing_a_member_and_persisting_again_drops_the_relationship() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 41);
        let alpha = group("alpha", "Alpha", vec![Rc::clone(&alice), Rc::clone(&bob)]);
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&alpha))
            .expect("persist");

        alpha
            .borrow_mut()
            .set_field("members", FieldValue::Entities(vec![Rc::clone(&alice)]))
            .expect("drop bob");
        let again = infra
            .in_unit_of_work(|i| i.persister().persist(&alpha))
            .expect("persist again");
        assert_eq!(again, element);

        let reloaded = infra
            .persister()
            .project_to(element, "Group", &MappingPolicy::eager(1))
            .expect("project");
        let members = match reloaded.borrow().field("members") {
            Some(FieldValue::Entities(items)) => items,
            _ => Vec::new(),
        };
        assert_eq!(names(&members), vec!["alice"]);
        assert!(bob.borrow().persistent_state().is_some());

        let hits = infra
            .persister()
            .lookup("Group", "name", &Value::from("alpha"), &MappingPolicy::lazy())
            .expect("lookup");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].borrow().persistent_state(), Some(element));
    }

    #[test]
    fn enum_like_collections_round_trip_as_text_lists() {
        let infra = infra();
        let roles = Value::List(vec![Value::from("ADMIN"), Value::from("VIEWER")]);
        let alpha = group("alpha", "Alpha", Vec::new());
        alpha
            .borrow_mut()
            .set_field("roles", FieldValue::Value(roles.clone()))
            .expect("roles");
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&alpha))
            .expect("persist");

        let loaded = infra
            .persister()
            .project_to(element, "Group", &MappingPolicy::lazy())
            .expect("project");
        assert_eq!(
            loaded.borrow().field("roles").and_then(|f| f.as_value().cloned()),
            Some(roles)
        );
    }

    #[test]
    fn read_only_collection_is_cached_and_rejects_writes() {
        let infra = infra();
        let alice = person("alice", 30);
        infra
            .in_unit_of_work(|i| i.persister().persist(&group("g1", "First", vec![Rc::clone(&alice)])))
            .expect("persist");

        let person_type = infra.mapping_context().descriptor("Person").expect("descriptor");
        let groups = person_type.require_property("groups").expect("groups");
        let state = infra.persister().entity_state(&alice).expect("state");
        let before = state.get_property(groups).expect("read").into_sequence().expect("seq");
        assert_eq!(before.elements().expect("elements").len(), 1);

        infra
            .in_unit_of_work(|i| i.persister().persist(&group("g2", "Second", vec![Rc::clone(&alice)])))
            .expect("persist");

        let cached = state.get_property(groups).expect("read").into_sequence().expect("seq");
        assert_eq!(cached.elements().expect("elements").len(), 1);

        let fresh = infra.persister().entity_state(&alice).expect("state");
        let current = fresh.get_property(groups).expect("read").into_sequence().expect("seq");
        assert_eq!(names(&current.entities().expect("entities")), vec!["g1", "g2"]);

        let err = infra
            .in_unit_of_work(|_| state.set_property(groups, FieldValue::Entities(Vec::new())))
            .expect_err("read-only");
        assert!(matches!(err, MappingError::ReadOnlyField { .. }));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn renaming_moves_the_index_entry() {
        let infra = infra();
        let alice = person("alice", 30);
        infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist");

        let lookup = |name: &str| {
            infra
                .persister()
                .lookup("Person", "name", &Value::from(name), &MappingPolicy::lazy())
                .expect("lookup")
        };
        assert_eq!(lookup("alice").len(), 1);

        let person_type = infra.mapping_context().descriptor("Person").expect("descriptor");
        infra
            .in_unit_of_work(|i| {
                i.persister().entity_state(&alice)?.set_property(
                    person_type.require_property("name")?,
                    FieldValue::Value(Value::from("alicia")),
                )
            })
            .expect("rename");

        assert!(lookup("alice").is_empty());
        assert_eq!(names(&lookup("alicia")), vec!["alicia"]);
    }

    #[test]
    fn fulltext_search_over_named_index() {
        let infra = infra();
        infra
            .in_unit_of_work(|i| {
                i.persister()
                    .persist(&group("graphs", "Graph Databases in Practice", Vec::new()))?;
                i.persister()
                    .persist(&group("cooking", "Slow Cooking", Vec::new()))?;
                Ok(())
            })
            .expect("persist");

        let search = |query: &str| {
            infra
                .persister()
                .search("Group", "title", query, &MappingPolicy::lazy())
                .expect("search")
        };
        assert_eq!(names(&search("graph*")), vec!["graphs"]);
        assert_eq!(names(&search("practice DATABASES")), vec!["graphs"]);
        assert!(search("cooking graph").is_empty());
    }

    #[test]
    fn find_all_includes_subtypes_as_their_concrete_type() {
        let infra = infra();
        infra
            .in_unit_of_work(|i| {
                i.persister().persist(&group("plain", "Plain", Vec::new()))?;
                i.persister().persist(&entity_ref(
                    DynamicEntity::new("SubGroup").with("name", Value::from("nested")),
                ))?;
                Ok(())
            })
            .expect("persist");

        let all: Vec<EntityRef> = infra
            .persister()
            .find_all("Group", &MappingPolicy::lazy())
            .expect("find")
            .collect::<Result<_, _>>()
            .expect("project");
        let mut types: Vec<String> = all
            .iter()
            .map(|e| e.borrow().type_name().to_string())
            .collect();
        types.sort();
        assert_eq!(types, vec!["Group", "SubGroup"]);

        assert_eq!(infra.persister().count("Group").expect("count"), 2);
        assert_eq!(infra.persister().count("SubGroup").expect("count"), 1);

        // Class-scoped index lives on the declaring type.
        let hits = infra
            .persister()
            .lookup("Group", "name", &Value::from("nested"), &MappingPolicy::lazy())
            .expect("lookup");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].borrow().type_name(), "SubGroup");
    }

    #[test]
    fn single_valued_relationship_is_resolved_on_read() {
        let infra = infra();
        let boss = person("boss", 60);
        let worker = person("worker", 20);
        worker
            .borrow_mut()
            .set_field("boss", FieldValue::Entity(Some(Rc::clone(&boss))))
            .expect("set");
        infra
            .in_unit_of_work(|i| i.persister().persist(&worker))
            .expect("persist");

        let person_type = infra.mapping_context().descriptor("Person").expect("descriptor");
        let state = infra.persister().entity_state(&worker).expect("state");
        let resolved = state
            .get_property(person_type.require_property("boss").expect("boss"))
            .expect("read")
            .into_single()
            .expect("single")
            .expect("present");
        assert_eq!(text(&resolved, "name").as_deref(), Some("boss"));

        // Clearing the field removes the relationship.
        infra
            .in_unit_of_work(|i| {
                i.persister().entity_state(&worker)?.set_property(
                    person_type.require_property("boss")?,
                    FieldValue::Entity(None),
                )
            })
            .expect("clear");
        assert_eq!(infra.db().relationship_count().expect("count"), 0);
    }
}

// =============================================================================
// CYCLES AND TRAVERSALS
// =============================================================================

mod cycles {
    use super::*;

    fn befriend(a: &EntityRef, b: &EntityRef) {
        a.borrow_mut()
            .set_field("friends", FieldValue::Entities(vec![Rc::clone(b)]))
            .expect("set");
    }

    #[test]
    fn persist_and_eager_project_terminate_on_cycles() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        befriend(&alice, &bob);
        befriend(&bob, &alice);

        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist");
        assert_eq!(infra.db().node_count().expect("count"), 2);
        assert_eq!(infra.db().relationship_count().expect("count"), 2);

        let loaded = infra
            .persister()
            .project_to(element, "Person", &MappingPolicy::eager(16))
            .expect("project");
        let friend = first(&loaded, "friends").expect("friend");
        assert_eq!(text(&friend, "name").as_deref(), Some("bob"));
        let back = first(&friend, "friends").expect("back");
        assert!(same_entity(&loaded, &back));
    }

    #[test]
    fn lazy_projection_leaves_relationships_unloaded() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        befriend(&alice, &bob);
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist");

        let loaded = infra
            .persister()
            .project_to(element, "Person", &MappingPolicy::lazy())
            .expect("project");
        assert!(loaded.borrow().field("friends").is_none());
    }

    #[test]
    fn traversal_field_follows_the_chain_once() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        let carol = person("carol", 32);
        befriend(&alice, &bob);
        befriend(&bob, &carol);
        befriend(&carol, &alice);
        infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist");

        let person_type = infra.mapping_context().descriptor("Person").expect("descriptor");
        let state = infra.persister().entity_state(&alice).expect("state");
        let reachable = state
            .get_property(person_type.require_property("reachable").expect("reachable"))
            .expect("read")
            .into_sequence()
            .expect("sequence");
        let visited: Vec<String> = reachable
            .entities()
            .expect("entities")
            .iter()
            .filter_map(|e| text(e, "name"))
            .collect();
        assert_eq!(visited, vec!["bob", "carol"]);

        let err = infra
            .in_unit_of_work(|_| {
                state.set_property(
                    person_type.require_property("reachable")?,
                    FieldValue::Entities(Vec::new()),
                )
            })
            .expect_err("traversal fields are read-only");
        assert!(matches!(err, MappingError::ReadOnlyField { .. }));
    }
}

// =============================================================================
// RELATIONSHIP ENTITIES
// =============================================================================

mod relationship_entities {
    use super::*;

    fn friendship(a: &EntityRef, b: &EntityRef, years: i64) -> EntityRef {
        entity_ref(
            DynamicEntity::new("Friendship")
                .with("years", Value::Int(years))
                .with("person1", FieldValue::Entity(Some(Rc::clone(a))))
                .with("person2", FieldValue::Entity(Some(Rc::clone(b)))),
        )
    }

    #[test]
    fn friendship_persists_endpoints_and_loads_them_back() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&friendship(&alice, &bob, 4)))
            .expect("persist");
        assert_eq!(element.kind(), ElementKind::Relationship);

        let rel = infra
            .db()
            .relationship(element.as_relationship().expect("relationship"))
            .expect("read")
            .expect("present");
        assert_eq!(rel.rel_type, "knows");
        assert_eq!(Some(ElementRef::Node(rel.start)), alice.borrow().persistent_state());
        assert_eq!(Some(ElementRef::Node(rel.end)), bob.borrow().persistent_state());

        assert_eq!(
            infra
                .type_representation()
                .read_type(element)
                .expect("type")
                .as_deref(),
            Some("Friendship")
        );
        assert!(infra.persister().is_relationship_entity("Friendship").expect("kind"));
        assert!(!infra.persister().is_node_entity("Friendship").expect("kind"));

        let loaded = infra
            .persister()
            .project(element, &MappingPolicy::lazy())
            .expect("project");
        assert_eq!(
            loaded.borrow().field("years").and_then(|f| f.as_value().cloned()),
            Some(Value::Int(4))
        );
        let start = first(&loaded, "person1").expect("start");
        let end = first(&loaded, "person2").expect("end");
        assert_eq!(text(&start, "name").as_deref(), Some("alice"));
        assert_eq!(text(&end, "name").as_deref(), Some("bob"));
    }

    #[test]
    fn bound_endpoints_are_not_rewritten() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        let alice_element = infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist alice");

        // unsaved in-memory change
        alice
            .borrow_mut()
            .set_field("name", FieldValue::Value(Value::from("alicia")))
            .expect("rename");
        infra
            .in_unit_of_work(|i| i.persister().persist(&friendship(&alice, &bob, 2)))
            .expect("persist friendship");

        assert_eq!(
            infra.db().property(alice_element, "name").expect("read"),
            Some(Value::from("alice"))
        );
        let renamed = infra
            .persister()
            .lookup("Person", "name", &Value::from("alicia"), &MappingPolicy::lazy())
            .expect("lookup");
        assert!(renamed.is_empty());
        assert!(bob.borrow().persistent_state().is_some());
    }

    #[test]
    fn relationship_entity_paths_convert_segments() {
        let infra = infra();
        let alice = person("alice", 30);
        let bob = person("bob", 31);
        infra
            .in_unit_of_work(|i| i.persister().persist(&friendship(&alice, &bob, 2)))
            .expect("persist");

        let start = alice
            .borrow()
            .persistent_state()
            .and_then(ElementRef::as_node)
            .expect("node");
        let paths = infra
            .db()
            .traverse(
                start,
                &TraversalDescription::new().relationships("knows", Direction::Outgoing),
            )
            .expect("traverse");
        let path = paths.into_iter().next().expect("path");

        let converted = infra
            .result_converter()
            .convert(&RawValue::Path(path), &Target::Path, &MappingPolicy::lazy())
            .expect("convert")
            .into_path()
            .expect("entity path");
        assert_eq!(converted.length(), 1);
        let end = converted.end_entity().expect("end").expect("present");
        assert_eq!(text(&end, "name").as_deref(), Some("bob"));
        let rel = converted
            .last_relationship_entity()
            .expect("relationship")
            .expect("present");
        assert_eq!(rel.borrow().type_name(), "Friendship");
        assert_eq!(converted.node_entities().count(), 2);
    }
}

// =============================================================================
// RESULT CONVERSION
// =============================================================================

mod conversion {
    use super::*;

    fn persisted_alice(infra: &MappingInfrastructure) -> trellis_core::NodeId {
        infra
            .in_unit_of_work(|i| i.persister().persist(&person("alice", 30)))
            .expect("persist")
            .as_node()
            .expect("node")
    }

    #[test]
    fn node_converts_to_entity_and_path() {
        let infra = infra();
        let node = persisted_alice(&infra);
        let converter = infra.result_converter();
        let policy = MappingPolicy::lazy();

        let entity = converter
            .convert(&RawValue::Node(node), &Target::Entity("Person".into()), &policy)
            .expect("entity")
            .into_entity()
            .expect("entity");
        assert_eq!(text(&entity, "name").as_deref(), Some("alice"));

        let path = converter
            .convert(&RawValue::Node(node), &Target::Path, &policy)
            .expect("path")
            .into_path()
            .expect("path");
        assert_eq!(path.length(), 0);
        let start = path.start_entity().expect("start").expect("present");
        assert_eq!(text(&start, "name").as_deref(), Some("alice"));

        let row = BTreeMap::from([("p".to_string(), RawValue::Node(node))]);
        let unwrapped = converter
            .convert(&RawValue::Map(row), &Target::Entity("Person".into()), &policy)
            .expect("row")
            .into_entity()
            .expect("entity");
        assert_eq!(text(&unwrapped, "name").as_deref(), Some("alice"));
    }

    #[test]
    fn scalar_defaults_and_conversion_service() {
        let infra = infra();
        let converter = infra.result_converter();
        let policy = MappingPolicy::lazy();

        let widened = converter
            .convert(&RawValue::Value(Value::Int(2)), &Target::Value(ValueType::Float), &policy)
            .expect("widen");
        assert_eq!(widened.as_value(), Some(&Value::Float(2.0)));

        let parsed = converter
            .convert(&RawValue::Value(Value::from("42")), &Target::Value(ValueType::Int), &policy)
            .expect("parse");
        assert_eq!(parsed.as_value(), Some(&Value::Int(42)));

        let list = converter
            .convert(
                &RawValue::List(vec![RawValue::Value(Value::Int(1)), RawValue::Null]),
                &Target::List(Box::new(Target::Value(ValueType::Int))),
                &policy,
            )
            .expect("list")
            .into_list()
            .expect("items");
        assert_eq!(list.len(), 2);
        assert!(list[1].is_null());

        let result = converter.convert(&RawValue::Value(Value::Bool(true)), &Target::Node, &policy);
        assert!(matches!(result, Err(MappingError::UnsupportedResult { ref shape, .. }) if shape == "bool"));
    }

    #[test]
    fn map_result_view_answers_accessors() {
        let infra = infra();
        let element = infra
            .in_unit_of_work(|i| {
                i.persister().persist(&group(
                    "graphs",
                    "Graphs",
                    vec![person("alice", 30), person("bob", 31)],
                ))
            })
            .expect("persist");
        let node = element.as_node().expect("node");
        let converter = infra.result_converter();
        let policy = MappingPolicy::lazy();

        let row = BTreeMap::from([
            ("group".to_string(), RawValue::Node(node)),
            ("count(p)".to_string(), RawValue::Value(Value::Int(2))),
        ]);
        let view = converter
            .convert(&RawValue::Map(row), &Target::MapResult("GroupSummary".into()), &policy)
            .expect("view")
            .into_view()
            .expect("view");
        assert_eq!(view.view_name(), "GroupSummary");

        let found = view.get("group").expect("group").into_entity().expect("entity");
        assert_eq!(text(&found, "name").as_deref(), Some("graphs"));
        assert_eq!(view.get("size").expect("size").as_value(), Some(&Value::Int(2)));
        assert!(matches!(view.get("nope"), Err(MappingError::UnknownAccessor { .. })));

        let partial = BTreeMap::from([("group".to_string(), RawValue::Node(node))]);
        let sparse = converter
            .convert(&RawValue::Map(partial), &Target::MapResult("GroupSummary".into()), &policy)
            .expect("view")
            .into_view()
            .expect("view");
        assert!(sparse.get("size").expect("size").is_null());

        assert!(matches!(
            converter.convert(&RawValue::Node(node), &Target::MapResult("GroupSummary".into()), &policy),
            Err(MappingError::UnsupportedResult { .. })
        ));
        assert!(matches!(
            converter.convert(
                &RawValue::Map(BTreeMap::new()),
                &Target::MapResult("Missing".into()),
                &policy
            ),
            Err(MappingError::UnknownView(_))
        ));
    }
}

// =============================================================================
// REMOVAL
// =============================================================================

mod removal {
    use super::*;

    #[test]
    fn removing_twice_is_a_state_error() {
        let infra = infra();
        let alice = person("alice", 30);
        infra
            .in_unit_of_work(|i| i.persister().persist(&group("g", "G", vec![Rc::clone(&alice)])))
            .expect("persist");
        let element = alice.borrow().persistent_state().expect("bound");

        infra
            .in_unit_of_work(|i| i.remover().remove_entity(&alice))
            .expect("remove");
        assert!(alice.borrow().persistent_state().is_none());
        assert_eq!(infra.db().relationship_count().expect("count"), 0);
        assert_eq!(infra.persister().count("Person").expect("count"), 0);
        assert!(
            infra
                .persister()
                .lookup("Person", "name", &Value::from("alice"), &MappingPolicy::lazy())
                .expect("lookup")
                .is_empty()
        );

        let err = infra
            .in_unit_of_work(|i| i.remover().remove(element))
            .expect_err("second removal");
        assert!(matches!(err, MappingError::ElementRemoved(e) if e == element));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn state_of_removed_element_fails() {
        let infra = infra();
        let alice = person("alice", 30);
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&alice))
            .expect("persist");
        let person_type = infra.mapping_context().descriptor("Person").expect("descriptor");
        let state = infra.persister().entity_state(&alice).expect("state");

        infra
            .in_unit_of_work(|i| i.remover().remove(element))
            .expect("remove");
        assert!(matches!(
            state.get_property(person_type.require_property("name").expect("name")),
            Err(MappingError::ElementRemoved(_))
        ));
    }

    #[test]
    fn removal_requires_a_unit_of_work() {
        let infra = infra();
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&person("alice", 30)))
            .expect("persist");
        assert!(matches!(
            infra.remover().remove(element),
            Err(MappingError::NoTransaction(_))
        ));
    }
}

// =============================================================================
// UNITS OF WORK AND CONFIGURATION
// =============================================================================

mod units_of_work {
    use super::*;

    #[test]
    fn writes_outside_a_unit_fail() {
        let infra = infra();
        let err = infra
            .persister()
            .persist(&person("alice", 30))
            .expect_err("no unit of work");
        assert!(matches!(err, MappingError::NoTransaction(_)));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn rollback_reverts_properties_indexes_and_type_records() {
        let infra = infra();
        let unit = infra.unit_of_work().expect("begin");
        let element = infra
            .persister()
            .persist(&person("alice", 30))
            .expect("persist");
        unit.rollback().expect("rollback");

        assert!(!infra.db().contains(element).expect("contains"));
        assert_eq!(infra.persister().count("Person").expect("count"), 0);
        assert!(
            infra
                .persister()
                .lookup("Person", "name", &Value::from("alice"), &MappingPolicy::lazy())
                .expect("lookup")
                .is_empty()
        );
    }

    #[test]
    fn indexing_representation_for_nodes() {
        let config = MappingConfig {
            node_type_representation: TypeRepresentationKind::Indexing,
            ..MappingConfig::default()
        };
        let infra = MappingInfrastructure::new(
            Arc::new(MemoryGraph::new()),
            Arc::new(common::registry()),
            config,
        );
        let element = infra
            .in_unit_of_work(|i| i.persister().persist(&person("alice", 30)))
            .expect("persist");
        let node = element.as_node().expect("node");

        assert!(infra.db().labels(node).expect("labels").is_empty());
        assert_eq!(
            infra.db().property(element, "__type__").expect("property"),
            Some(Value::from("Person"))
        );
        assert_eq!(infra.persister().count("Person").expect("count"), 1);
    }

    #[test]
    fn conflicting_qualifiers_fail_at_build_time() {
        let mut registry = TypeRegistry::new();
        registry.register(
            TypeDeclaration::node("Bad", DynamicEntity::factory("Bad")).field(
                FieldDeclaration::new("x", ValueType::Text)
                    .with(Qualifier::Transient)
                    .with(Qualifier::GraphProperty),
            ),
        );
        let context = MappingContext::new(Arc::new(registry), Default::default());
        let err = context.descriptor("Bad").expect_err("conflict");
        assert!(matches!(err, MappingError::ConflictingQualifiers { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let fixtures = MappingContext::new(Arc::new(common::registry()), Default::default());
        assert_eq!(fixtures.validate_all().expect("valid").len(), 4);
    }
}

// =============================================================================
// QUERY EXECUTION
// =============================================================================

mod queries {
    use super::*;

    /// Answers every statement with the nodes carrying the `label` parameter.
    struct LabelScan;

    impl QueryEngine for LabelScan {
        fn execute(&self, db: &dyn GraphDatabase, query: &Query) -> Result<Vec<Row>, MappingError> {
            let label = query
                .params
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(db
                .nodes_with_label(label)?
                .into_iter()
                .map(|n| Row::from([("n".to_string(), RawValue::Node(n))]))
                .collect())
        }
    }

    #[test]
    fn rows_are_converted_to_entities() {
        let infra = MappingInfrastructure::new(
            Arc::new(MemoryGraph::new()),
            Arc::new(common::registry()),
            MappingConfig::default(),
        )
        .with_query_engine(Box::new(LabelScan));
        infra
            .in_unit_of_work(|i| {
                i.persister().persist(&person("alice", 30))?;
                i.persister().persist(&person("bob", 31))?;
                Ok(())
            })
            .expect("persist");

        let executor = infra.query_executor().expect("executor");
        let people: Vec<EntityRef> = executor
            .query_for_list(
                &Query::new("scan").param("label", "Person"),
                &Target::Entity("Person".into()),
            )
            .expect("list")
            .into_iter()
            .filter_map(|c| c.into_entity())
            .collect();
        assert_eq!(names(&people), vec!["alice", "bob"]);

        let none = executor
            .query_for_object(&Query::new("scan").param("label", "Nobody"), &Target::Node)
            .expect("object");
        assert!(none.is_none());
        assert_eq!(executor.query(&Query::new("scan").param("label", "Person")).expect("rows").len(), 2);
    }
}

// =============================================================================
// DURABLE STORE
// =============================================================================

mod durable {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn redb_store_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("graph.redb");
        {
            let infra = infra_on(Arc::new(RedbGraph::open(&db_path).expect("open")));
            infra
                .in_unit_of_work(|i| {
                    i.persister()
                        .persist(&group("graphs", "Graph Theory", vec![person("alice", 30)]))
                })
                .expect("persist");
        }

        let infra = infra_on(Arc::new(RedbGraph::open(&db_path).expect("reopen")));
        let groups: Vec<EntityRef> = infra
            .persister()
            .find_all("Group", &MappingPolicy::eager(1))
            .expect("find")
            .collect::<Result<_, _>>()
            .expect("project");
        assert_eq!(groups.len(), 1);
        let member = first(&groups[0], "members").expect("member");
        assert_eq!(text(&member, "name").as_deref(), Some("alice"));
        assert_eq!(
            infra
                .persister()
                .search("Group", "title", "theory", &MappingPolicy::lazy())
                .expect("search")
                .len(),
            1
        );
    }

    #[test]
    fn failed_unit_leaves_disk_untouched() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("graph.redb");
        {
            let infra = infra_on(Arc::new(RedbGraph::open(&db_path).expect("open")));
            let result: Result<(), MappingError> = infra.in_unit_of_work(|i| {
                i.persister().persist(&person("ghost", 1))?;
                Err(MappingError::UnknownType("Abort".into()))
            });
            assert!(result.is_err());
        }
        let infra = infra_on(Arc::new(RedbGraph::open(&db_path).expect("reopen")));
        assert_eq!(infra.db().node_count().expect("count"), 0);
    }
}
