//! # Type Representation
//!
//! Records which mapped type a store element represents, and enumerates the
//! elements of a type.
//!
//! Two mechanisms:
//! - `LabelTypeRepresentation`: one label per type in the hierarchy plus a
//!   `_<Type>` marker for the most-derived type (nodes only).
//! - `IndexingTypeRepresentation`: the `__type__` property plus one
//!   `__types__` index entry per type in the hierarchy.
//!
//! `TypeRepresentationStrategies` composes one strategy per element kind.

use crate::graph::{GraphDatabase, IndexKind};
use crate::mapping::{MappedType, MappingContext};
use crate::primitives::{CONCRETE_LABEL_PREFIX, TYPE_PROPERTY, TYPES_INDEX, TYPES_INDEX_KEY};
use crate::{ElementKind, ElementRef, MappingError, StoreError, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazy sequence of store elements.
pub type ElementIter = Box<dyn Iterator<Item = ElementRef>>;

/// Which mechanism records type information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRepresentationKind {
    Label,
    Indexing,
}

/// Records and reads type information of store elements.
pub trait TypeRepresentationStrategy: Send + Sync {
    fn kind(&self) -> TypeRepresentationKind;

    /// Associate `element` with `mapped`, replacing any previous record.
    fn record_type(&self, element: ElementRef, mapped: &MappedType) -> Result<(), MappingError>;

    /// The most-derived type recorded for `element`.
    fn read_type(&self, element: ElementRef) -> Result<Option<String>, MappingError>;

    /// Elements recorded with `mapped` or one of its subtypes.
    fn find_all(&self, mapped: &MappedType) -> Result<ElementIter, MappingError>;

    fn count(&self, mapped: &MappedType) -> Result<usize, MappingError>;

    /// Drop the type record of `element`.
    fn clear_type(&self, element: ElementRef) -> Result<(), MappingError>;
}

/// Hierarchy of a previously recorded type; undeclared types fall back to
/// the bare name so their marker can still be cleaned up.
fn recorded_hierarchy(context: &MappingContext, type_name: &str) -> Vec<String> {
    match context.descriptor(type_name) {
        Ok(mapped) => mapped.hierarchy().map(String::from).collect(),
        Err(e) => {
            warn!(type_name, error = %e, "recorded type no longer resolves");
            vec![type_name.to_string()]
        }
    }
}

// =============================================================================
// LABELS
// =============================================================================

#[derive(Clone)]
pub struct LabelTypeRepresentation {
    db: Arc<dyn GraphDatabase>,
    context: Arc<MappingContext>,
}

impl LabelTypeRepresentation {
    pub fn new(db: Arc<dyn GraphDatabase>, context: Arc<MappingContext>) -> Self {
        Self { db, context }
    }

    fn marker(type_name: &str) -> String {
        format!("{CONCRETE_LABEL_PREFIX}{type_name}")
    }
}

impl TypeRepresentationStrategy for LabelTypeRepresentation {
    fn kind(&self) -> TypeRepresentationKind {
        TypeRepresentationKind::Label
    }

    fn record_type(&self, element: ElementRef, mapped: &MappedType) -> Result<(), MappingError> {
        let ElementRef::Node(node) = element else {
            return Err(StoreError::Unsupported("labels on relationships").into());
        };
        self.clear_type(element)?;
        for type_name in mapped.hierarchy() {
            self.db.add_label(node, type_name)?;
        }
        self.db.add_label(node, &Self::marker(&mapped.name))?;
        debug!(%element, type_name = %mapped.name, "recorded type label");
        Ok(())
    }

    fn read_type(&self, element: ElementRef) -> Result<Option<String>, MappingError> {
        let ElementRef::Node(node) = element else {
            return Ok(None);
        };
        Ok(self
            .db
            .labels(node)?
            .into_iter()
            .find_map(|label| label.strip_prefix(CONCRETE_LABEL_PREFIX).map(String::from)))
    }

    fn find_all(&self, mapped: &MappedType) -> Result<ElementIter, MappingError> {
        let nodes = self.db.nodes_with_label(&mapped.name)?;
        Ok(Box::new(nodes.into_iter().map(ElementRef::Node)))
    }

    fn count(&self, mapped: &MappedType) -> Result<usize, MappingError> {
        Ok(self.db.nodes_with_label(&mapped.name)?.len())
    }

    fn clear_type(&self, element: ElementRef) -> Result<(), MappingError> {
        let ElementRef::Node(node) = element else {
            return Ok(());
        };
        let Some(previous) = self.read_type(element)? else {
            return Ok(());
        };
        for type_name in recorded_hierarchy(&self.context, &previous) {
            self.db.remove_label(node, &type_name)?;
        }
        self.db.remove_label(node, &Self::marker(&previous))?;
        Ok(())
    }
}

// =============================================================================
// INDEXING
// =============================================================================

#[derive(Clone)]
pub struct IndexingTypeRepresentation {
    db: Arc<dyn GraphDatabase>,
    context: Arc<MappingContext>,
}

impl IndexingTypeRepresentation {
    pub fn new(db: Arc<dyn GraphDatabase>, context: Arc<MappingContext>) -> Self {
        Self { db, context }
    }
}

impl TypeRepresentationStrategy for IndexingTypeRepresentation {
    fn kind(&self) -> TypeRepresentationKind {
        TypeRepresentationKind::Indexing
    }

    fn record_type(&self, element: ElementRef, mapped: &MappedType) -> Result<(), MappingError> {
        self.clear_type(element)?;
        self.db
            .set_property(element, TYPE_PROPERTY, Value::from(mapped.name.as_str()))?;
        for type_name in mapped.hierarchy() {
            self.db
                .index_add(TYPES_INDEX, IndexKind::Exact, TYPES_INDEX_KEY, type_name, element)?;
        }
        debug!(%element, type_name = %mapped.name, "recorded type property");
        Ok(())
    }

    fn read_type(&self, element: ElementRef) -> Result<Option<String>, MappingError> {
        Ok(self
            .db
            .property(element, TYPE_PROPERTY)?
            .and_then(|v| v.as_str().map(String::from)))
    }

    fn find_all(&self, mapped: &MappedType) -> Result<ElementIter, MappingError> {
        let kind = mapped.kind;
        let elements = self.db.index_get(TYPES_INDEX, TYPES_INDEX_KEY, &mapped.name)?;
        Ok(Box::new(
            elements.into_iter().filter(move |e| e.kind() == kind),
        ))
    }

    fn count(&self, mapped: &MappedType) -> Result<usize, MappingError> {
        Ok(self.find_all(mapped)?.count())
    }

    fn clear_type(&self, element: ElementRef) -> Result<(), MappingError> {
        let Some(previous) = self.read_type(element)? else {
            return Ok(());
        };
        for type_name in recorded_hierarchy(&self.context, &previous) {
            self.db
                .index_remove(TYPES_INDEX, TYPES_INDEX_KEY, &type_name, element)?;
        }
        self.db.remove_property(element, TYPE_PROPERTY)?;
        Ok(())
    }
}

// =============================================================================
// FACTORY AND FACADE
// =============================================================================

/// Picks one strategy per element kind.
pub struct TypeRepresentationFactory;

impl TypeRepresentationFactory {
    /// Create the strategy for `element_kind`.
    ///
    /// Labels are only available for nodes on stores that support them;
    /// otherwise indexing is used.
    pub fn create(
        requested: TypeRepresentationKind,
        element_kind: ElementKind,
        db: &Arc<dyn GraphDatabase>,
        context: &Arc<MappingContext>,
    ) -> Box<dyn TypeRepresentationStrategy> {
        let labels_usable = element_kind == ElementKind::Node && db.supports_labels();
        match requested {
            TypeRepresentationKind::Label if labels_usable => Box::new(
                LabelTypeRepresentation::new(Arc::clone(db), Arc::clone(context)),
            ),
            TypeRepresentationKind::Label => {
                warn!(
                    element_kind = %element_kind,
                    "label type representation unavailable, falling back to indexing"
                );
                Box::new(IndexingTypeRepresentation::new(
                    Arc::clone(db),
                    Arc::clone(context),
                ))
            }
            TypeRepresentationKind::Indexing => Box::new(IndexingTypeRepresentation::new(
                Arc::clone(db),
                Arc::clone(context),
            )),
        }
    }
}

/// One strategy per element kind behind a single interface.
pub struct TypeRepresentationStrategies {
    nodes: Box<dyn TypeRepresentationStrategy>,
    relationships: Box<dyn TypeRepresentationStrategy>,
}

impl TypeRepresentationStrategies {
    pub fn new(
        nodes: Box<dyn TypeRepresentationStrategy>,
        relationships: Box<dyn TypeRepresentationStrategy>,
    ) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    /// The strategy in use for `kind`.
    pub fn strategy(&self, kind: ElementKind) -> &dyn TypeRepresentationStrategy {
        match kind {
            ElementKind::Node => self.nodes.as_ref(),
            ElementKind::Relationship => self.relationships.as_ref(),
        }
    }

    pub fn record_type(&self, element: ElementRef, mapped: &MappedType) -> Result<(), MappingError> {
        if element.kind() != mapped.kind {
            return Err(MappingError::KindMismatch {
                expected: mapped.kind,
                actual: element,
            });
        }
        self.strategy(element.kind()).record_type(element, mapped)
    }

    pub fn read_type(&self, element: ElementRef) -> Result<Option<String>, MappingError> {
        self.strategy(element.kind()).read_type(element)
    }

    pub fn find_all(&self, mapped: &MappedType) -> Result<ElementIter, MappingError> {
        self.strategy(mapped.kind).find_all(mapped)
    }

    pub fn count(&self, mapped: &MappedType) -> Result<usize, MappingError> {
        self.strategy(mapped.kind).count(mapped)
    }

    pub fn clear_type(&self, element: ElementRef) -> Result<(), MappingError> {
        self.strategy(element.kind()).clear_type(element)
    }
}
