//! # trellis-core
//!
//! The object-graph mapping core for Trellis.
//!
//! Mapped domain types are bound to nodes and relationships of a property
//! graph store. Fields read through to the store on access, writes go
//! straight to the store inside a unit of work, and raw query results are
//! converted back into entities, paths and map-result views.
//!
//! ## Architectural Constraints
//!
//! - Synchronous: no async, no network dependencies (pure Rust)
//! - Deterministic: stores and caches are ordered (`BTreeMap`/`BTreeSet`)
//! - Closed seams: the store, metadata, conversion and query engine are traits
//! - One composition root: every component borrows a [`MappingInfrastructure`]

// =============================================================================
// MODULES
// =============================================================================

pub mod convert;
pub mod entity;
pub mod fulltext;
pub mod graph;
pub mod index;
pub mod infrastructure;
pub mod instantiator;
pub mod mapping;
pub mod persister;
pub mod primitives;
pub mod query;
pub mod remover;
pub mod state;
pub mod storage;
pub mod typerep;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Direction, ElementKind, ElementRef, ErrorKind, MappingError, NodeId, Path, Properties,
    Relationship, RelationshipId, StoreError, Value,
};

// =============================================================================
// RE-EXPORTS: Stores
// =============================================================================

pub use graph::{GraphDatabase, IndexKind, MemoryGraph, TraversalDescription};
pub use storage::RedbGraph;

// =============================================================================
// RE-EXPORTS: Entities and Metadata
// =============================================================================

pub use entity::{
    DynamicEntity, Entity, EntityFactory, EntityRef, FieldValue, entity_ref, same_entity,
    with_entity, with_entity_mut,
};
pub use mapping::{
    FieldDeclaration, IndexDeclaration, IndexScope, MappedType, MappingContext, MetadataSource,
    Qualifier, TypeDeclaration, TypeRegistry, ValueType, ViewDeclaration,
};

// =============================================================================
// RE-EXPORTS: Mapping Runtime
// =============================================================================

pub use convert::{Converted, MapResultView, RawValue, Target};
pub use infrastructure::{MappingConfig, MappingInfrastructure, UnitOfWork};
pub use persister::MappingPolicy;
pub use query::{Query, QueryEngine};
pub use state::{EntityState, LazySequence, StateValue};
pub use typerep::TypeRepresentationKind;
