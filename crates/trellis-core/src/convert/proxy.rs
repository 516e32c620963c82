use super::{Converted, RawValue, ResultConverter, Target};
use crate::mapping::ViewDeclaration;
use crate::persister::MappingPolicy;
use crate::MappingError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One accessor of a view: where to read it and what to convert it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewAccessor {
    pub column: String,
    pub target: Target,
}

/// Accessor dispatch table of one map-result view, built once and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewTable {
    name: String,
    accessors: BTreeMap<String, ViewAccessor>,
}

impl ViewTable {
    /// Build the table for `view`. Duplicate accessors are rejected.
    pub fn build(view: &ViewDeclaration) -> Result<Self, MappingError> {
        let mut accessors = BTreeMap::new();
        for accessor in &view.accessors {
            let entry = ViewAccessor {
                column: accessor.column.clone().unwrap_or_else(|| accessor.name.clone()),
                target: accessor.target.clone(),
            };
            if accessors.insert(accessor.name.clone(), entry).is_some() {
                return Err(MappingError::invalid(
                    &view.name,
                    format!("accessor {} declared twice", accessor.name),
                ));
            }
        }
        Ok(Self {
            name: view.name.clone(),
            accessors,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn accessor(&self, name: &str) -> Option<&ViewAccessor> {
        self.accessors.get(name)
    }

    pub fn accessor_names(&self) -> impl Iterator<Item = &str> {
        self.accessors.keys().map(String::as_str)
    }
}

/// A view over one result row, answering accessors by column lookup.
///
/// Every `get` converts the stored column again through the same converter
/// and policy; a missing column reads as null.
pub struct MapResultView<'a> {
    converter: ResultConverter<'a>,
    table: Arc<ViewTable>,
    row: BTreeMap<String, RawValue>,
    policy: MappingPolicy,
}

impl<'a> MapResultView<'a> {
    pub(crate) fn new(
        converter: ResultConverter<'a>,
        table: Arc<ViewTable>,
        row: BTreeMap<String, RawValue>,
        policy: MappingPolicy,
    ) -> Self {
        Self {
            converter,
            table,
            row,
            policy,
        }
    }

    #[must_use]
    pub fn view_name(&self) -> &str {
        self.table.name()
    }

    /// The raw row behind the view.
    #[must_use]
    pub fn row(&self) -> &BTreeMap<String, RawValue> {
        &self.row
    }

    /// Answer accessor `name`.
    pub fn get(&self, name: &str) -> Result<Converted<'a>, MappingError> {
        let accessor = self
            .table
            .accessor(name)
            .ok_or_else(|| MappingError::UnknownAccessor {
                view: self.table.name().to_string(),
                accessor: name.to_string(),
            })?;
        let raw = self.row.get(&accessor.column).unwrap_or(&RawValue::Null);
        self.converter.convert(raw, &accessor.target, &self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ValueType;

    #[test]
    fn table_maps_accessors_to_columns() {
        let view = ViewDeclaration::new("GroupSummary")
            .accessor("name", Target::Value(ValueType::Text))
            .column("size", "count(p)", Target::Value(ValueType::Int));
        let table = ViewTable::build(&view).expect("table");

        assert_eq!(table.accessor("name").map(|a| a.column.as_str()), Some("name"));
        assert_eq!(table.accessor("size").map(|a| a.column.as_str()), Some("count(p)"));
        assert_eq!(table.accessor_names().collect::<Vec<_>>(), vec!["name", "size"]);
    }

    #[test]
    fn duplicate_accessor_rejected() {
        let view = ViewDeclaration::new("V")
            .accessor("a", Target::Raw)
            .accessor("a", Target::Raw);
        assert!(matches!(
            ViewTable::build(&view),
            Err(MappingError::InvalidMapping { .. })
        ));
    }
}
