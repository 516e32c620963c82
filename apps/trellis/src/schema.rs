//! # Schema
//!
//! Turns the `[[types]]` and `[[views]]` sections of the configuration into
//! a [`TypeRegistry`]. Every declared type is backed by [`DynamicEntity`].
//!
//! Also parses the textual forms the CLI accepts: value types, result
//! targets, element references and field values.

use crate::config::{AppConfig, FieldConfig, TypeConfig, TypeKind, ViewConfig};
use crate::error::AppError;
use std::sync::Arc;
use trellis_core::mapping::{DegreeComputer, RelationshipTypeTraversal};
use trellis_core::{
    DynamicEntity, ElementRef, FieldDeclaration, IndexDeclaration, NodeId, Qualifier,
    RelationshipId, Target, TypeDeclaration, TypeRegistry, Value, ValueType, ViewDeclaration,
};

/// Build the registry declared by `config`.
pub fn registry(config: &AppConfig) -> Result<TypeRegistry, AppError> {
    let mut registry = TypeRegistry::new();
    for declared in &config.types {
        registry.register(type_declaration(declared)?);
    }
    for view in &config.views {
        registry.register_view(view_declaration(view)?);
    }
    Ok(registry)
}

fn type_declaration(config: &TypeConfig) -> Result<TypeDeclaration, AppError> {
    let factory = DynamicEntity::factory(config.name.as_str());
    let mut declaration = match config.kind {
        TypeKind::Node => TypeDeclaration::node(config.name.as_str(), factory),
        TypeKind::Relationship => {
            let rel_type = config.relationship_type.as_deref().ok_or_else(|| {
                AppError::Config(format!(
                    "relationship type {} needs relationship_type",
                    config.name
                ))
            })?;
            TypeDeclaration::relationship(config.name.as_str(), rel_type, factory)
        }
    };
    for supertype in &config.extends {
        declaration = declaration.extends(supertype.as_str());
    }
    for field in &config.fields {
        declaration = declaration.field(field_declaration(field)?);
    }
    Ok(declaration)
}

fn field_declaration(config: &FieldConfig) -> Result<FieldDeclaration, AppError> {
    let mut field = FieldDeclaration::new(config.name.as_str(), parse_value_type(&config.value_type)?);
    if config.property {
        field = field.with(Qualifier::GraphProperty);
    }
    if config.transient {
        field = field.with(Qualifier::Transient);
    }
    if config.start_node {
        field = field.with(Qualifier::StartNode);
    }
    if config.end_node {
        field = field.with(Qualifier::EndNode);
    }
    if let Some(index) = &config.index {
        let mut declaration = IndexDeclaration::default();
        if let Some(name) = &index.name {
            declaration = declaration.named(name.as_str());
        }
        if let Some(key) = &index.key {
            declaration = declaration.key(key.as_str());
        }
        if let Some(scope) = index.scope {
            declaration = declaration.level(scope);
        }
        if index.fulltext {
            declaration = declaration.fulltext();
        }
        field = field.indexed(declaration);
    }
    if let Some(rel) = &config.relationship {
        field = field.with(Qualifier::RelatedTo {
            rel_type: rel.rel_type.clone(),
            direction: rel.direction,
            read_only: rel.read_only,
        });
    }
    if let Some(traversal) = &config.traversal {
        let mut builder = RelationshipTypeTraversal::new(traversal.rel_type.as_str(), traversal.direction);
        builder.max_depth = traversal.max_depth;
        field = field.with(Qualifier::GraphTraversal {
            builder: Arc::new(builder),
            params: Vec::new(),
        });
    }
    if let Some(computed) = &config.computed {
        field = field.with(Qualifier::Computed(Arc::new(DegreeComputer {
            rel_type: computed.rel_type.clone(),
            direction: computed.direction,
        })));
    }
    Ok(field)
}

fn view_declaration(config: &ViewConfig) -> Result<ViewDeclaration, AppError> {
    let mut view = ViewDeclaration::new(config.name.as_str());
    for accessor in &config.accessors {
        let target = parse_target(&accessor.target)?;
        view = match &accessor.column {
            Some(column) => view.column(accessor.name.as_str(), column.as_str(), target),
            None => view.accessor(accessor.name.as_str(), target),
        };
    }
    Ok(view)
}

// =============================================================================
// TEXTUAL FORMS
// =============================================================================

fn is_type_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(char::is_alphabetic) && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Parse the textual form of a [`ValueType`].
pub fn parse_value_type(s: &str) -> Result<ValueType, AppError> {
    let s = s.trim();
    let parsed = match s {
        "bool" => ValueType::Bool,
        "int" => ValueType::Int,
        "float" => ValueType::Float,
        "text" => ValueType::Text,
        "nodes" => ValueType::Nodes,
        "relationships" => ValueType::Relationships,
        _ => {
            if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
                let inner = parse_value_type(inner)?;
                if !inner.is_scalar() {
                    return Err(AppError::Config(format!("list of {inner} is not a value type")));
                }
                ValueType::List(Box::new(inner))
            } else if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                if !is_type_name(inner) {
                    return Err(AppError::Config(format!("invalid entity type {inner:?}")));
                }
                ValueType::Entities(inner.to_string())
            } else if is_type_name(s) {
                ValueType::Entity(s.to_string())
            } else {
                return Err(AppError::Config(format!("invalid field type {s:?}")));
            }
        }
    };
    Ok(parsed)
}

/// Parse the textual form of a result [`Target`].
pub fn parse_target(s: &str) -> Result<Target, AppError> {
    let s = s.trim();
    Ok(match s {
        "raw" => Target::Raw,
        "node" => Target::Node,
        "relationship" => Target::Relationship,
        "path" => Target::Path,
        _ => {
            if let Some(view) = s.strip_prefix("view:") {
                Target::MapResult(view.to_string())
            } else {
                match parse_value_type(s)? {
                    ValueType::Entity(name) => Target::Entity(name),
                    ValueType::Entities(name) => Target::List(Box::new(Target::Entity(name))),
                    ValueType::Nodes => Target::List(Box::new(Target::Node)),
                    ValueType::Relationships => Target::List(Box::new(Target::Relationship)),
                    scalar => Target::Value(scalar),
                }
            }
        }
    })
}

/// Parse an element reference: `3` or `node:3` for nodes, `rel:3` for
/// relationships.
pub fn parse_element(s: &str) -> Result<ElementRef, AppError> {
    let (kind, id) = s.split_once(':').unwrap_or(("node", s));
    let id: u64 = id
        .trim()
        .parse()
        .map_err(|_| AppError::Input(format!("invalid element id {s:?}")))?;
    match kind {
        "node" | "n" => Ok(ElementRef::Node(NodeId(id))),
        "rel" | "relationship" | "r" => Ok(ElementRef::Relationship(RelationshipId(id))),
        other => Err(AppError::Input(format!("unknown element kind {other:?}"))),
    }
}

/// Textual form of an element reference, accepted back by [`parse_element`].
pub fn format_element(element: ElementRef) -> String {
    match element {
        ElementRef::Node(n) => format!("node:{}", n.0),
        ElementRef::Relationship(r) => format!("rel:{}", r.0),
    }
}

/// Parse a `FIELD=VALUE` assignment.
pub fn parse_assignment(s: &str) -> Result<(String, String), AppError> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| AppError::Input(format!("expected FIELD=VALUE, got {s:?}")))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(AppError::Input(format!("missing field name in {s:?}")));
    }
    Ok((field.to_string(), value.to_string()))
}

/// Parse a command-line value for a field of type `value_type`.
///
/// `null` clears the field; lists are comma separated.
pub fn parse_value(value_type: &ValueType, raw: &str) -> Result<Value, AppError> {
    if raw == "null" {
        return Ok(Value::Null);
    }
    let invalid = || AppError::Input(format!("{raw:?} is not a valid {value_type}"));
    match value_type {
        ValueType::Bool => raw.parse().map(Value::Bool).map_err(|_| invalid()),
        ValueType::Int => raw.parse().map(Value::Int).map_err(|_| invalid()),
        ValueType::Float => raw.parse().map(Value::Float).map_err(|_| invalid()),
        ValueType::Text => Ok(Value::from(raw)),
        ValueType::List(inner) => {
            if raw.is_empty() {
                return Ok(Value::List(Vec::new()));
            }
            raw.split(',')
                .map(|item| parse_value(inner, item.trim()))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        ValueType::Entity(_) | ValueType::Entities(_) | ValueType::Nodes | ValueType::Relationships => {
            Err(AppError::Input(format!(
                "{value_type} fields are set with link/unlink"
            )))
        }
    }
}
