//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Every command writes either a human-readable report or one JSON document
//! to the given writer. Writes run inside a single unit of work that commits
//! only when the whole command succeeds.

use super::Session;
use crate::error::AppError;
use crate::schema::{format_element, parse_assignment, parse_element, parse_value};
use serde_json::json;
use std::io::Write;
use std::rc::Rc;
use tracing::info;
use trellis_core::mapping::{Cardinality, FieldStrategy, MappedType, PersistentProperty};
use trellis_core::{
    DynamicEntity, ElementRef, EntityRef, FieldValue, MappingError, MappingInfrastructure,
    MappingPolicy, Value, entity_ref,
};

// =============================================================================
// RENDERING
// =============================================================================

/// A rendered field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Value(Value),
    Element(Option<ElementRef>),
    Elements(Vec<ElementRef>),
}

/// A loaded entity flattened for output.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub element: ElementRef,
    pub type_name: String,
    pub fields: Vec<(String, Rendered)>,
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => json!(s),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_json).collect()),
    }
}

impl Rendered {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Value(v) => value_json(v),
            Self::Element(e) => e.map_or(serde_json::Value::Null, |e| json!(format_element(e))),
            Self::Elements(items) => {
                json!(items.iter().map(|e| format_element(*e)).collect::<Vec<_>>())
            }
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Value(v) => v.to_string(),
            Self::Element(e) => e.map_or_else(|| "null".to_string(), format_element),
            Self::Elements(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(|e| format_element(*e))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl EntityReport {
    pub fn to_json(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        json!({
            "element": format_element(self.element),
            "type": self.type_name,
            "fields": fields,
        })
    }

    fn write_text(&self, out: &mut dyn Write) -> Result<(), AppError> {
        writeln!(out, "{} {}", format_element(self.element), self.type_name)?;
        for (name, value) in &self.fields {
            writeln!(out, "  {name}: {}", value.to_text())?;
        }
        Ok(())
    }
}

fn bound_element(entity: &EntityRef) -> Result<ElementRef, AppError> {
    let e = entity.borrow();
    e.persistent_state()
        .ok_or_else(|| MappingError::Unbound(e.type_name().to_string()).into())
}

/// Flatten a loaded entity. Relationship and traversal fields are read
/// through the entity state as element lists.
pub fn report(infra: &MappingInfrastructure, entity: &EntityRef) -> Result<EntityReport, AppError> {
    let element = bound_element(entity)?;
    let state = infra.persister().entity_state(entity)?;
    let mapped = state.mapped_type();
    let policy = MappingPolicy::lazy();

    let mut fields = Vec::with_capacity(mapped.properties.len() + 2);
    for property in &mapped.properties {
        let rendered = match &property.strategy {
            FieldStrategy::Scalar | FieldStrategy::Indexed(_) | FieldStrategy::Computed(_) => {
                match entity.borrow().field(&property.name) {
                    Some(FieldValue::Value(v)) => Rendered::Value(v),
                    _ => Rendered::Value(Value::Null),
                }
            }
            FieldStrategy::Relationship(spec) => {
                let elements = match state.sequence(property, &policy)? {
                    Some(sequence) => sequence.elements()?,
                    None => Vec::new(),
                };
                if spec.cardinality == Cardinality::One {
                    Rendered::Element(elements.into_iter().next())
                } else {
                    Rendered::Elements(elements)
                }
            }
            FieldStrategy::Traversal(_) => match state.sequence(property, &policy)? {
                Some(sequence) => Rendered::Elements(sequence.elements()?),
                None => Rendered::Elements(Vec::new()),
            },
        };
        fields.push((property.name.clone(), rendered));
    }

    for endpoint in [&mapped.start_node, &mapped.end_node].into_iter().flatten() {
        let node = match entity.borrow().field(&endpoint.name) {
            Some(FieldValue::Entity(Some(e))) => e.borrow().persistent_state(),
            _ => None,
        };
        fields.push((endpoint.name.clone(), Rendered::Element(node)));
    }

    Ok(EntityReport {
        element,
        type_name: mapped.name.clone(),
        fields,
    })
}

fn write_reports(
    infra: &MappingInfrastructure,
    out: &mut dyn Write,
    json_mode: bool,
    entities: &[EntityRef],
) -> Result<(), AppError> {
    let reports = entities
        .iter()
        .map(|e| report(infra, e))
        .collect::<Result<Vec<_>, _>>()?;
    if json_mode {
        let items: Vec<serde_json::Value> = reports.iter().map(EntityReport::to_json).collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&items)?)?;
    } else if reports.is_empty() {
        writeln!(out, "No matching entities")?;
    } else {
        for r in &reports {
            r.write_text(out)?;
        }
    }
    Ok(())
}

fn write_report(
    infra: &MappingInfrastructure,
    out: &mut dyn Write,
    json_mode: bool,
    entity: &EntityRef,
) -> Result<(), AppError> {
    let report = report(infra, entity)?;
    if json_mode {
        writeln!(out, "{}", serde_json::to_string_pretty(&report.to_json())?)?;
        Ok(())
    } else {
        report.write_text(out)
    }
}

/// Reload `element` and report it, so derived fields reflect the store.
fn write_element(
    infra: &MappingInfrastructure,
    out: &mut dyn Write,
    json_mode: bool,
    element: ElementRef,
) -> Result<(), AppError> {
    let entity = infra.persister().project(element, &MappingPolicy::lazy())?;
    write_report(infra, out, json_mode, &entity)
}

// =============================================================================
// HELPERS
// =============================================================================

fn load(infra: &MappingInfrastructure, element: &str) -> Result<EntityRef, AppError> {
    let element = parse_element(element)?;
    Ok(infra.persister().project(element, &MappingPolicy::lazy())?)
}

/// Parse `FIELD=VALUE` assignments against the scalar fields of `mapped`.
fn assignments(mapped: &MappedType, set: &[String]) -> Result<Vec<(String, Value)>, AppError> {
    set.iter()
        .map(|raw| {
            let (field, value) = parse_assignment(raw)?;
            let property = mapped.require_property(&field)?;
            if !property.is_property() {
                return Err(AppError::Input(format!(
                    "{}.{field} is a {} field",
                    mapped.name,
                    property.strategy.tag()
                )));
            }
            Ok((field, parse_value(&property.value_type, &value)?))
        })
        .collect()
}

fn relationship_property<'m>(
    mapped: &'m MappedType,
    field: &str,
) -> Result<&'m PersistentProperty, AppError> {
    let property = mapped.require_property(field)?;
    if property.relationship().is_none() {
        return Err(AppError::Input(format!(
            "{}.{field} is a {} field",
            mapped.name,
            property.strategy.tag()
        )));
    }
    Ok(property)
}

// =============================================================================
// TYPES COMMAND
// =============================================================================

/// List mapped types and views.
pub fn cmd_types(session: &Session, out: &mut dyn Write, json_mode: bool) -> Result<(), AppError> {
    let infra = &session.infra;
    let types = infra.mapping_context().validate_all()?;

    let mut views = Vec::with_capacity(session.config.views.len());
    for view in &session.config.views {
        let table = infra.view_table(&view.name)?;
        views.push((
            table.name().to_string(),
            table.accessor_names().map(String::from).collect::<Vec<_>>(),
        ));
    }

    if json_mode {
        let types: Vec<serde_json::Value> = types
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "kind": format!("{:?}", t.kind).to_lowercase(),
                    "supertypes": t.supertypes,
                    "relationship_type": t.relationship_type,
                    "fields": t.properties.iter().map(|p| json!({
                        "name": p.name,
                        "type": p.value_type.to_string(),
                        "strategy": p.strategy.tag(),
                        "read_only": p.is_read_only(),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        let views: Vec<serde_json::Value> = views
            .iter()
            .map(|(name, accessors)| json!({ "name": name, "accessors": accessors }))
            .collect();
        let output = json!({ "types": types, "views": views });
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        return Ok(());
    }

    writeln!(out, "Mapped Types")?;
    writeln!(out, "============")?;
    for t in &types {
        let mut header = format!("{} ({:?})", t.name, t.kind);
        if !t.supertypes.is_empty() {
            header.push_str(&format!(" extends {}", t.supertypes.join(", ")));
        }
        if let Some(rel_type) = &t.relationship_type {
            header.push_str(&format!(" as {rel_type}"));
        }
        writeln!(out, "{header}")?;
        for p in &t.properties {
            writeln!(out, "  {}: {} [{}]", p.name, p.value_type, p.strategy.tag())?;
        }
    }
    if !views.is_empty() {
        writeln!(out)?;
        writeln!(out, "Views")?;
        writeln!(out, "=====")?;
        for (name, accessors) in &views {
            writeln!(out, "{name}: {}", accessors.join(", "))?;
        }
    }
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Create a node entity.
pub fn cmd_create(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
    set: &[String],
) -> Result<(), AppError> {
    let infra = &session.infra;
    let mapped = infra.mapping_context().descriptor(type_name)?;
    if !mapped.is_node_entity() {
        return Err(AppError::Input(format!(
            "{type_name} is a relationship entity, use relate"
        )));
    }

    let mut instance = DynamicEntity::new(type_name);
    for (field, value) in assignments(&mapped, set)? {
        instance = instance.with(field, value);
    }
    let entity = entity_ref(instance);
    let element = infra.in_unit_of_work(|i| i.persister().persist(&entity))?;
    info!(%element, type_name, "entity created");

    write_element(infra, out, json_mode, element)
}

/// Create a relationship entity between two existing nodes.
pub fn cmd_relate(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
    start: &str,
    end: &str,
    set: &[String],
) -> Result<(), AppError> {
    let infra = &session.infra;
    let mapped = infra.mapping_context().descriptor(type_name)?;
    let (Some(start_field), Some(end_field)) = (&mapped.start_node, &mapped.end_node) else {
        return Err(AppError::Input(format!(
            "{type_name} is not a relationship entity"
        )));
    };

    let start = load(infra, start)?;
    let end = load(infra, end)?;
    let mut instance = DynamicEntity::new(type_name)
        .with(start_field.name.as_str(), FieldValue::Entity(Some(start)))
        .with(end_field.name.as_str(), FieldValue::Entity(Some(end)));
    for (field, value) in assignments(&mapped, set)? {
        instance = instance.with(field, value);
    }
    let entity = entity_ref(instance);
    let element = infra.in_unit_of_work(|i| i.persister().persist(&entity))?;
    info!(%element, type_name, "relationship entity created");

    write_element(infra, out, json_mode, element)
}

/// Write one scalar field.
pub fn cmd_set(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    element: &str,
    field: &str,
    value: &str,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let entity = load(infra, element)?;
    let state = infra.persister().entity_state(&entity)?;
    let property = state.mapped_type().require_property(field)?;
    let value = parse_value(&property.value_type, value)?;
    infra.in_unit_of_work(|_| state.set_property(property, FieldValue::Value(value)))?;
    info!(element, field, "field updated");

    write_element(infra, out, json_mode, state.persistent_state())
}

/// How `cmd_link` changes a relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Add,
    Remove,
}

/// Add `target` to, or remove it from, a relationship field.
pub fn cmd_link(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    element: &str,
    field: &str,
    target: &str,
    mode: LinkMode,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let entity = load(infra, element)?;
    let target = load(infra, target)?;
    let target_element = bound_element(&target)?;

    let state = infra.persister().entity_state(&entity)?;
    let property = relationship_property(state.mapped_type(), field)?;
    let policy = MappingPolicy::lazy();

    infra.in_unit_of_work(|_| {
        let current = match state.sequence(property, &policy)? {
            Some(sequence) => sequence.entities()?,
            None => Vec::new(),
        };

        let mut updated: Vec<EntityRef> = current
            .into_iter()
            .filter(|e| e.borrow().persistent_state() != Some(target_element))
            .collect();
        if mode == LinkMode::Add {
            updated.push(Rc::clone(&target));
        }

        let value = match property.relationship().map(|spec| spec.cardinality) {
            Some(Cardinality::One) => FieldValue::Entity(updated.into_iter().last()),
            _ => FieldValue::Entities(updated),
        };
        state.set_property(property, value)
    })?;
    info!(element, field, target = %target_element, ?mode, "relationship field updated");

    write_element(infra, out, json_mode, state.persistent_state())
}

/// Remove an entity.
pub fn cmd_remove(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    element: &str,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let element = parse_element(element)?;
    infra.in_unit_of_work(|i| i.remover().remove(element))?;
    info!(%element, "entity removed");

    if json_mode {
        let output = json!({ "removed": format_element(element) });
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
    } else {
        writeln!(out, "Removed {}", format_element(element))?;
    }
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Show one entity.
pub fn cmd_show(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    element: &str,
) -> Result<(), AppError> {
    let entity = load(&session.infra, element)?;
    write_report(&session.infra, out, json_mode, &entity)
}

/// List instances of a type, subtypes included.
pub fn cmd_find(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
    limit: Option<usize>,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let entities = infra
        .persister()
        .find_all(type_name, &MappingPolicy::lazy())?
        .take(limit.unwrap_or(usize::MAX))
        .collect::<Result<Vec<_>, _>>()?;
    write_reports(infra, out, json_mode, &entities)
}

/// Count instances of a type, subtypes included.
pub fn cmd_count(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
) -> Result<(), AppError> {
    let count = session.infra.persister().count(type_name)?;
    if json_mode {
        let output = json!({ "type": type_name, "count": count });
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
    } else {
        writeln!(out, "{type_name}: {count}")?;
    }
    Ok(())
}

/// Exact lookup on an indexed field.
pub fn cmd_lookup(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
    field: &str,
    value: &str,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let mapped = infra.mapping_context().descriptor(type_name)?;
    let property = mapped.require_property(field)?;
    let value = parse_value(&property.value_type, value)?;
    let entities = infra
        .persister()
        .lookup(type_name, field, &value, &MappingPolicy::lazy())?;
    write_reports(infra, out, json_mode, &entities)
}

/// Full-text search on an indexed field.
pub fn cmd_search(
    session: &Session,
    out: &mut dyn Write,
    json_mode: bool,
    type_name: &str,
    field: &str,
    query: &str,
) -> Result<(), AppError> {
    let infra = &session.infra;
    let entities = infra
        .persister()
        .search(type_name, field, query, &MappingPolicy::lazy())?;
    write_reports(infra, out, json_mode, &entities)
}
