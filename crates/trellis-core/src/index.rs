//! # Index Provider
//!
//! Resolves an indexed field's index and writes/queries its entries.
//!
//! Name resolution follows the precedence documented in [`crate::mapping`];
//! only the per-instance rule is left open at build time and resolved here
//! against the concrete type being written.

use crate::graph::{GraphDatabase, IndexKind};
use crate::mapping::{IndexName, IndexScope, IndexSpec, MappedType};
use crate::typerep::ElementIter;
use crate::{ElementRef, MappingError, Value};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// A fully resolved index location for one field of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub name: String,
    pub key: String,
    pub scope: IndexScope,
    pub kind: IndexKind,
}

pub struct IndexProvider<'a> {
    db: &'a dyn GraphDatabase,
}

impl<'a> IndexProvider<'a> {
    pub fn new(db: &'a dyn GraphDatabase) -> Self {
        Self { db }
    }

    /// Resolve `spec` for an instance whose most-derived type is `concrete`.
    #[must_use]
    pub fn resolve(&self, spec: &IndexSpec, concrete: &MappedType) -> IndexTarget {
        let name = match &spec.name {
            IndexName::Fixed(name) => name.clone(),
            IndexName::PerInstance => concrete.name.clone(),
        };
        IndexTarget {
            name,
            key: spec.key.clone(),
            scope: spec.scope,
            kind: spec.kind,
        }
    }

    /// Add entries for `value`. Lists index each element; `Null` adds nothing.
    pub fn index(
        &self,
        target: &IndexTarget,
        value: &Value,
        element: ElementRef,
    ) -> Result<(), MappingError> {
        for entry in value.index_keys() {
            self.db
                .index_add(&target.name, target.kind, &target.key, &entry, element)?;
            debug!(index = %target.name, key = %target.key, value = %entry, %element, "index entry added");
        }
        Ok(())
    }

    /// Remove the entries `index` would have added for `value`.
    pub fn remove(
        &self,
        target: &IndexTarget,
        value: &Value,
        element: ElementRef,
    ) -> Result<(), MappingError> {
        for entry in value.index_keys() {
            if self
                .db
                .index_remove(&target.name, &target.key, &entry, element)?
            {
                debug!(index = %target.name, key = %target.key, value = %entry, %element, "index entry removed");
            }
        }
        Ok(())
    }

    /// Exact lookup.
    pub fn query(&self, index: &str, key: &str, value: &Value) -> Result<ElementIter, MappingError> {
        let mut found = BTreeSet::new();
        for entry in value.index_keys() {
            found.extend(self.db.index_get(index, key, &entry)?);
        }
        trace!(index, key, hits = found.len(), "index query");
        Ok(Box::new(found.into_iter()))
    }

    /// Full-text query over `index`.
    pub fn query_fulltext(&self, index: &str, expression: &str) -> Result<ElementIter, MappingError> {
        let found = self.db.index_query(index, expression)?;
        trace!(index, expression, hits = found.len(), "full-text query");
        Ok(Box::new(found.into_iter()))
    }

    /// Drop every entry referencing `element`.
    pub fn remove_all(&self, element: ElementRef) -> Result<usize, MappingError> {
        Ok(self.db.index_remove_element(element)?)
    }
}
