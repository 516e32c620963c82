//! # Result Converter
//!
//! Turns raw query results into what the caller asked for.
//!
//! Dispatch order for a raw value and a target:
//! 1. map-result view targets build a [`MapResultView`] over a result map
//! 2. path targets wrap the path in an [`EntityPath`]
//! 3. mapped entity targets project the element through the persister
//! 4. structural defaults: identity, raw elements, `Int` to `Float` widening
//! 5. the conversion service
//!
//! Anything left over is an unsupported result naming the raw value's shape.
//! A single-column row handed to a non-view target is unwrapped first.

mod path;
mod proxy;

pub use path::EntityPath;
pub use proxy::{MapResultView, ViewAccessor, ViewTable};

use crate::entity::EntityRef;
use crate::infrastructure::MappingInfrastructure;
use crate::mapping::ValueType;
use crate::persister::MappingPolicy;
use crate::{MappingError, NodeId, Path, RelationshipId, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

// =============================================================================
// RAW VALUES AND TARGETS
// =============================================================================

/// A raw value as produced by a query engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Value(Value),
    Node(NodeId),
    Relationship(RelationshipId),
    Path(Path),
    Map(BTreeMap<String, RawValue>),
    List(Vec<RawValue>),
}

impl RawValue {
    /// Short description of the value's shape, used in errors.
    #[must_use]
    pub fn shape(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Value(v) => v.type_name().into(),
            Self::Node(n) => format!("node({})", n.0),
            Self::Relationship(r) => format!("relationship({})", r.0),
            Self::Path(p) => format!("path(length {})", p.length()),
            Self::Map(m) => format!("map({} entries)", m.len()),
            Self::List(items) => format!("list({} items)", items.len()),
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// What a raw value should be converted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The raw value unchanged.
    Raw,
    Value(ValueType),
    /// A mapped entity type (node or relationship entity).
    Entity(String),
    Path,
    Node,
    Relationship,
    /// A map-result view by name.
    MapResult(String),
    List(Box<Target>),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Value(vt) => write!(f, "{vt}"),
            Self::Entity(t) => write!(f, "entity {t}"),
            Self::Path => f.write_str("path"),
            Self::Node => f.write_str("node"),
            Self::Relationship => f.write_str("relationship"),
            Self::MapResult(v) => write!(f, "view {v}"),
            Self::List(inner) => write!(f, "list of {inner}"),
        }
    }
}

/// A converted result.
pub enum Converted<'a> {
    Null,
    Value(Value),
    Node(NodeId),
    Relationship(RelationshipId),
    Raw(RawValue),
    Entity(EntityRef),
    Path(EntityPath<'a>),
    View(MapResultView<'a>),
    List(Vec<Converted<'a>>),
}

impl<'a> Converted<'a> {
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_entity(self) -> Option<EntityRef> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_view(self) -> Option<MapResultView<'a>> {
        match self {
            Self::View(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_path(self) -> Option<EntityPath<'a>> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_list(self) -> Option<Vec<Converted<'a>>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// =============================================================================
// CONVERSION SERVICE
// =============================================================================

/// Generic value conversion, consulted after the structural defaults.
pub trait ConversionService: Send + Sync {
    fn can_convert(&self, value: &Value, target: &ValueType) -> bool;

    fn convert(&self, value: &Value, target: &ValueType) -> Result<Value, MappingError>;
}

/// Text parsing and formatting between scalar types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConversionService;

impl DefaultConversionService {
    fn try_convert(value: &Value, target: &ValueType) -> Option<Value> {
        match (value, target) {
            (Value::Text(s), ValueType::Int) => s.trim().parse().ok().map(Value::Int),
            (Value::Text(s), ValueType::Float) => s.trim().parse().ok().map(Value::Float),
            (Value::Text(s), ValueType::Bool) => s.trim().parse().ok().map(Value::Bool),
            (Value::Float(x), ValueType::Int) if x.fract() == 0.0 && x.is_finite() => {
                Some(Value::Int(*x as i64))
            }
            (Value::Bool(_) | Value::Int(_) | Value::Float(_), ValueType::Text) => {
                Some(Value::Text(value.to_string()))
            }
            (Value::List(items), ValueType::List(inner)) => items
                .iter()
                .map(|item| {
                    inner
                        .coerce(item.clone())
                        .ok()
                        .or_else(|| Self::try_convert(item, inner))
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (scalar, ValueType::List(inner)) if !matches!(scalar, Value::List(_)) => {
                inner
                    .coerce(scalar.clone())
                    .ok()
                    .or_else(|| Self::try_convert(scalar, inner))
                    .map(|v| Value::List(vec![v]))
            }
            _ => None,
        }
    }
}

impl ConversionService for DefaultConversionService {
    fn can_convert(&self, value: &Value, target: &ValueType) -> bool {
        Self::try_convert(value, target).is_some()
    }

    fn convert(&self, value: &Value, target: &ValueType) -> Result<Value, MappingError> {
        Self::try_convert(value, target).ok_or_else(|| MappingError::Conversion {
            shape: value.type_name(),
            value: value.to_string(),
            target: target.to_string(),
        })
    }
}

// =============================================================================
// RESULT CONVERTER
// =============================================================================

#[derive(Clone, Copy)]
pub struct ResultConverter<'a> {
    infra: &'a MappingInfrastructure,
}

impl<'a> ResultConverter<'a> {
    pub fn new(infra: &'a MappingInfrastructure) -> Self {
        Self { infra }
    }

    /// Convert `raw` to `target`.
    pub fn convert(
        &self,
        raw: &RawValue,
        target: &Target,
        policy: &MappingPolicy,
    ) -> Result<Converted<'a>, MappingError> {
        trace!(shape = %raw.shape(), %target, "converting result");

        if let Target::MapResult(view) = target {
            return match raw {
                RawValue::Map(row) => {
                    let table = self.infra.view_table(view)?;
                    Ok(Converted::View(MapResultView::new(
                        *self,
                        table,
                        row.clone(),
                        policy.clone(),
                    )))
                }
                RawValue::Null => Ok(Converted::Null),
                other => Err(self.unsupported(other, target)),
            };
        }

        // A one-column row stands for its only value.
        if let RawValue::Map(row) = raw
            && row.len() == 1
            && !matches!(target, Target::Raw)
            && let Some(only) = row.values().next()
        {
            return self.convert(only, target, policy);
        }

        match (raw, target) {
            (RawValue::Null, _) => Ok(Converted::Null),
            (_, Target::Raw) => Ok(Converted::Raw(raw.clone())),

            (RawValue::List(items), Target::List(inner)) => items
                .iter()
                .map(|item| self.convert(item, inner, policy))
                .collect::<Result<Vec<_>, _>>()
                .map(Converted::List),

            // (a) paths
            (RawValue::Path(path), Target::Path) => Ok(Converted::Path(EntityPath::new(
                self.infra,
                path.clone(),
                policy.clone(),
            ))),
            (RawValue::Node(node), Target::Path) => Ok(Converted::Path(EntityPath::new(
                self.infra,
                Path::single(*node),
                policy.clone(),
            ))),

            // (b) mapped entities
            (RawValue::Node(n), Target::Entity(type_name)) => self
                .infra
                .persister()
                .project_to(crate::ElementRef::Node(*n), type_name, policy)
                .map(Converted::Entity),
            (RawValue::Relationship(r), Target::Entity(type_name)) => self
                .infra
                .persister()
                .project_to(crate::ElementRef::Relationship(*r), type_name, policy)
                .map(Converted::Entity),

            // (c) structural defaults
            (RawValue::Node(n), Target::Node) => Ok(Converted::Node(*n)),
            (RawValue::Relationship(r), Target::Relationship) => Ok(Converted::Relationship(*r)),
            (RawValue::Path(p), Target::Node) => p
                .end_node()
                .map(Converted::Node)
                .ok_or_else(|| self.unsupported(raw, target)),
            (RawValue::Path(p), Target::Relationship) => p
                .last_relationship()
                .map(Converted::Relationship)
                .ok_or_else(|| self.unsupported(raw, target)),
            (RawValue::Value(v), Target::Value(vt)) => match vt.coerce(v.clone()) {
                Ok(converted) => Ok(Converted::Value(converted)),
                // (d) conversion service
                Err(_) if self.infra.conversion_service().can_convert(v, vt) => self
                    .infra
                    .conversion_service()
                    .convert(v, vt)
                    .map(Converted::Value),
                Err(_) => Err(self.unsupported(raw, target)),
            },

            _ => Err(self.unsupported(raw, target)),
        }
    }

    fn unsupported(&self, raw: &RawValue, target: &Target) -> MappingError {
        MappingError::UnsupportedResult {
            shape: raw.shape(),
            target: target.to_string(),
        }
    }
}
