//! # Query Module
//!
//! Query execution through an external engine, with rows converted by the
//! result converter.
//!
//! The core does not parse any query language: a `QueryEngine` receives the
//! statement and parameters verbatim and returns rows of raw values.

use crate::convert::{Converted, RawValue, ResultConverter, Target};
use crate::graph::GraphDatabase;
use crate::infrastructure::MappingInfrastructure;
use crate::persister::MappingPolicy;
use crate::{MappingError, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One result row, keyed by column.
pub type Row = BTreeMap<String, RawValue>;

/// Named statement parameters.
pub type Params = BTreeMap<String, Value>;

/// A statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub statement: String,
    pub params: Params,
}

impl Query {
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Params::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// The query engine collaborator.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, db: &dyn GraphDatabase, query: &Query) -> Result<Vec<Row>, MappingError>;
}

/// Runs queries and converts their rows.
pub struct QueryExecutor<'a> {
    infra: &'a MappingInfrastructure,
    engine: &'a dyn QueryEngine,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(infra: &'a MappingInfrastructure, engine: &'a dyn QueryEngine) -> Self {
        Self { infra, engine }
    }

    /// Raw rows.
    pub fn query(&self, query: &Query) -> Result<Vec<Row>, MappingError> {
        let rows = self.engine.execute(self.infra.db(), query)?;
        debug!(statement = %query.statement, rows = rows.len(), "query executed");
        Ok(rows)
    }

    /// Every row converted to `target` with the default policy.
    pub fn query_for_list(&self, query: &Query, target: &Target) -> Result<Vec<Converted<'a>>, MappingError> {
        self.query_for_list_with(query, target, &self.infra.config().default_policy)
    }

    pub fn query_for_list_with(
        &self,
        query: &Query,
        target: &Target,
        policy: &MappingPolicy,
    ) -> Result<Vec<Converted<'a>>, MappingError> {
        let converter = ResultConverter::new(self.infra);
        self.query(query)?
            .into_iter()
            .map(|row| converter.convert(&RawValue::Map(row), target, policy))
            .collect()
    }

    /// The first row converted to `target`, if any.
    pub fn query_for_object(&self, query: &Query, target: &Target) -> Result<Option<Converted<'a>>, MappingError> {
        let converter = ResultConverter::new(self.infra);
        self.query(query)?
            .into_iter()
            .next()
            .map(|row| {
                converter.convert(
                    &RawValue::Map(row),
                    target,
                    &self.infra.config().default_policy,
                )
            })
            .transpose()
    }
}
