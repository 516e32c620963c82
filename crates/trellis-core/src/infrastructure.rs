//! # Mapping Infrastructure
//!
//! The composition root: built once from a store, a metadata source and a
//! `MappingConfig`, then passed by reference to everything that maps.
//!
//! Components borrow the infrastructure for the duration of one operation
//! (`persister()`, `remover()`, `result_converter()`, ...). Nothing here is a
//! global; two infrastructures over two stores coexist freely.

use crate::convert::{ConversionService, DefaultConversionService, ResultConverter, ViewTable};
use crate::graph::GraphDatabase;
use crate::index::IndexProvider;
use crate::instantiator::EntityInstantiator;
use crate::mapping::{IndexScope, MappingContext, MetadataSource};
use crate::persister::{EntityPersister, MappingPolicy};
use crate::query::{QueryEngine, QueryExecutor};
use crate::remover::EntityRemover;
use crate::typerep::{
    TypeRepresentationFactory, TypeRepresentationKind, TypeRepresentationStrategies,
};
use crate::{ElementKind, MappingError, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Mapping configuration, typically read from the `[mapping]` table of a
/// TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub node_type_representation: TypeRepresentationKind,
    pub relationship_type_representation: TypeRepresentationKind,
    /// Scope of indexed fields that do not declare a level.
    pub default_index_scope: IndexScope,
    pub default_policy: MappingPolicy,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            node_type_representation: TypeRepresentationKind::Label,
            relationship_type_representation: TypeRepresentationKind::Indexing,
            default_index_scope: IndexScope::Class,
            default_policy: MappingPolicy::default(),
        }
    }
}

// =============================================================================
// INFRASTRUCTURE
// =============================================================================

pub struct MappingInfrastructure {
    config: MappingConfig,
    db: Arc<dyn GraphDatabase>,
    context: Arc<MappingContext>,
    type_representation: TypeRepresentationStrategies,
    conversion_service: Box<dyn ConversionService>,
    views: RwLock<BTreeMap<String, Arc<ViewTable>>>,
    query_engine: Option<Box<dyn QueryEngine>>,
}

impl MappingInfrastructure {
    pub fn new(
        db: Arc<dyn GraphDatabase>,
        metadata: Arc<dyn MetadataSource>,
        config: MappingConfig,
    ) -> Self {
        let context = Arc::new(MappingContext::new(metadata, config.default_index_scope));
        let type_representation = TypeRepresentationStrategies::new(
            TypeRepresentationFactory::create(
                config.node_type_representation,
                ElementKind::Node,
                &db,
                &context,
            ),
            TypeRepresentationFactory::create(
                config.relationship_type_representation,
                ElementKind::Relationship,
                &db,
                &context,
            ),
        );
        debug!(
            nodes = ?type_representation.strategy(ElementKind::Node).kind(),
            relationships = ?type_representation.strategy(ElementKind::Relationship).kind(),
            "mapping infrastructure ready"
        );
        Self {
            config,
            db,
            context,
            type_representation,
            conversion_service: Box::new(DefaultConversionService),
            views: RwLock::new(BTreeMap::new()),
            query_engine: None,
        }
    }

    /// Replace the default conversion service.
    #[must_use]
    pub fn with_conversion_service(mut self, service: Box<dyn ConversionService>) -> Self {
        self.conversion_service = service;
        self
    }

    #[must_use]
    pub fn with_query_engine(mut self, engine: Box<dyn QueryEngine>) -> Self {
        self.query_engine = Some(engine);
        self
    }

    // -------------------------------------------------------------------------
    // shared collaborators
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    #[must_use]
    pub fn db(&self) -> &dyn GraphDatabase {
        self.db.as_ref()
    }

    #[must_use]
    pub fn mapping_context(&self) -> &MappingContext {
        &self.context
    }

    #[must_use]
    pub fn type_representation(&self) -> &TypeRepresentationStrategies {
        &self.type_representation
    }

    #[must_use]
    pub fn conversion_service(&self) -> &dyn ConversionService {
        self.conversion_service.as_ref()
    }

    /// Dispatch table of a map-result view, built on first use.
    pub fn view_table(&self, name: &str) -> Result<Arc<ViewTable>, MappingError> {
        {
            let views = self.views.read().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(table) = views.get(name) {
                return Ok(Arc::clone(table));
            }
        }
        let mut views = self.views.write().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(table) = views.get(name) {
            return Ok(Arc::clone(table));
        }
        let declaration = self
            .context
            .metadata()
            .view(name)
            .ok_or_else(|| MappingError::UnknownView(name.to_string()))?;
        let table = Arc::new(ViewTable::build(&declaration)?);
        debug!(view = name, "built view table");
        views.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    // -------------------------------------------------------------------------
    // per-operation components
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn persister(&self) -> EntityPersister<'_> {
        EntityPersister::new(self)
    }

    #[must_use]
    pub fn remover(&self) -> EntityRemover<'_> {
        EntityRemover::new(self)
    }

    #[must_use]
    pub fn index_provider(&self) -> IndexProvider<'_> {
        IndexProvider::new(self.db())
    }

    #[must_use]
    pub fn result_converter(&self) -> ResultConverter<'_> {
        ResultConverter::new(self)
    }

    #[must_use]
    pub fn instantiator(&self, kind: ElementKind) -> EntityInstantiator<'_> {
        EntityInstantiator::new(self, kind)
    }

    /// Executor over the configured query engine.
    pub fn query_executor(&self) -> Result<QueryExecutor<'_>, MappingError> {
        let engine = self
            .query_engine
            .as_deref()
            .ok_or(StoreError::Unsupported("no query engine configured"))?;
        Ok(QueryExecutor::new(self, engine))
    }

    // -------------------------------------------------------------------------
    // unit of work
    // -------------------------------------------------------------------------

    /// Begin a unit of work, or join the one already active.
    pub fn unit_of_work(&self) -> Result<UnitOfWork<'_>, MappingError> {
        UnitOfWork::begin(self.db())
    }

    /// Run `f` in a unit of work: commit on `Ok`, roll back on `Err`.
    pub fn in_unit_of_work<R>(
        &self,
        f: impl FnOnce(&Self) -> Result<R, MappingError>,
    ) -> Result<R, MappingError> {
        let unit = self.unit_of_work()?;
        match f(self) {
            Ok(result) => {
                unit.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = unit.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl fmt::Debug for MappingInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingInfrastructure")
            .field("config", &self.config)
            .field("context", &self.context)
            .field("query_engine", &self.query_engine.is_some())
            .finish()
    }
}

// =============================================================================
// UNIT OF WORK
// =============================================================================

/// Guard over a store unit of work.
///
/// The guard that began the unit owns it: only the owner commits or rolls
/// back. A guard that joined an active unit leaves it to the owner. An
/// owning guard dropped without `commit` rolls back.
pub struct UnitOfWork<'a> {
    db: &'a dyn GraphDatabase,
    owner: bool,
    finished: bool,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(db: &'a dyn GraphDatabase) -> Result<Self, MappingError> {
        let owner = !db.in_transaction();
        if owner {
            db.begin_tx()?;
        }
        Ok(Self {
            db,
            owner,
            finished: false,
        })
    }

    /// Whether this guard began the unit.
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn commit(mut self) -> Result<(), MappingError> {
        self.finished = true;
        if self.owner {
            self.db.commit_tx()?;
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), MappingError> {
        self.finished = true;
        if self.owner {
            self.db.rollback_tx()?;
        }
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.owner && !self.finished {
            warn!("unit of work dropped without commit, rolling back");
            if let Err(e) = self.db.rollback_tx() {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}
