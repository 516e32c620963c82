//! # redb-backed Graph Storage
//!
//! A disk-backed graph store using the redb embedded database.
//!
//! The working set lives in a [`MemoryGraph`]; reads never touch disk. On
//! `commit_tx` the difference between the unit of work's snapshot and its
//! final state is written in a single redb write transaction, and the
//! in-memory unit is committed only after redb has committed. A failed write
//! rolls the in-memory unit back, so memory and disk never diverge.
//!
//! Records are postcard-encoded. The metadata table carries the magic bytes
//! and layout version, checked on open.

use crate::graph::{
    GraphDatabase, GraphState, IndexData, IndexKind, MemoryGraph, NodeRecord, RelationshipRecord,
};
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::{
    Direction, ElementRef, NodeId, Properties, Relationship, RelationshipId, StoreError, Value,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Table for nodes: NodeId(u64) -> serialized `NodeRecord`
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Table for relationships: RelationshipId(u64) -> serialized `RelationshipRecord`
const RELATIONSHIPS: TableDefinition<u64, &[u8]> = TableDefinition::new("relationships");

/// Table for indexes: index name -> serialized `IndexData`
const INDEXES: TableDefinition<&str, &[u8]> = TableDefinition::new("indexes");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const META_MAGIC: &str = "magic";
const META_VERSION: &str = "format_version";
const META_NEXT_NODE: &str = "next_node_id";
const META_NEXT_RELATIONSHIP: &str = "next_relationship_id";

fn io_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(value).map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn magic_value() -> u64 {
    u64::from(u32::from_be_bytes(*MAGIC_BYTES))
}

/// A disk-backed graph store using redb.
pub struct RedbGraph {
    db: Database,
    path: PathBuf,
    memory: MemoryGraph,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(io_error)?;

        // Initialize tables and the header if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_error)?;
            {
                let _ = write_txn.open_table(NODES).map_err(io_error)?;
                let _ = write_txn.open_table(RELATIONSHIPS).map_err(io_error)?;
                let _ = write_txn.open_table(INDEXES).map_err(io_error)?;
                let mut meta = write_txn.open_table(METADATA).map_err(io_error)?;
                let magic = meta.get(META_MAGIC).map_err(io_error)?.map(|v| v.value());
                match magic {
                    None => {
                        meta.insert(META_MAGIC, magic_value()).map_err(io_error)?;
                        meta.insert(META_VERSION, FORMAT_VERSION).map_err(io_error)?;
                    }
                    Some(found) if found != magic_value() => {
                        return Err(StoreError::SerializationError(
                            "invalid magic bytes".to_string(),
                        ));
                    }
                    Some(_) => {}
                }
                let version = meta.get(META_VERSION).map_err(io_error)?.map(|v| v.value());
                if version != Some(FORMAT_VERSION) {
                    return Err(StoreError::SerializationError(format!(
                        "unsupported layout version: {:?} (expected {})",
                        version, FORMAT_VERSION
                    )));
                }
            }
            write_txn.commit().map_err(io_error)?;
        }

        let state = Self::load(&db)?;
        debug!(
            path = %path.display(),
            nodes = state.nodes.len(),
            relationships = state.relationships.len(),
            indexes = state.indexes.len(),
            "opened redb graph"
        );
        Ok(Self {
            db,
            path,
            memory: MemoryGraph::from_state(state),
        })
    }

    fn load(db: &Database) -> Result<GraphState, StoreError> {
        let read_txn = db.begin_read().map_err(io_error)?;
        let mut state = GraphState::default();

        let nodes = read_txn.open_table(NODES).map_err(io_error)?;
        for entry in nodes.iter().map_err(io_error)? {
            let (key, value) = entry.map_err(io_error)?;
            state
                .nodes
                .insert(NodeId(key.value()), decode::<NodeRecord>(value.value())?);
        }

        let relationships = read_txn.open_table(RELATIONSHIPS).map_err(io_error)?;
        for entry in relationships.iter().map_err(io_error)? {
            let (key, value) = entry.map_err(io_error)?;
            state.relationships.insert(
                RelationshipId(key.value()),
                decode::<RelationshipRecord>(value.value())?,
            );
        }

        let indexes = read_txn.open_table(INDEXES).map_err(io_error)?;
        for entry in indexes.iter().map_err(io_error)? {
            let (key, value) = entry.map_err(io_error)?;
            state
                .indexes
                .insert(key.value().to_string(), decode::<IndexData>(value.value())?);
        }

        let meta = read_txn.open_table(METADATA).map_err(io_error)?;
        state.next_node_id = meta
            .get(META_NEXT_NODE)
            .map_err(io_error)?
            .map(|v| v.value())
            .unwrap_or(0);
        state.next_relationship_id = meta
            .get(META_NEXT_RELATIONSHIP)
            .map_err(io_error)?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(state)
    }

    /// The database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        self.db.compact().map_err(io_error)?;
        Ok(())
    }

    /// Write the pending unit of work to disk.
    fn persist(&self) -> Result<usize, StoreError> {
        let diff = self.memory.with_pending(StateDiff::between)??;
        if diff.is_empty() {
            return Ok(0);
        }
        let changes = diff.len();

        let write_txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut nodes = write_txn.open_table(NODES).map_err(io_error)?;
            for (id, record) in &diff.nodes {
                if let Some(bytes) = record {
                    nodes.insert(id.0, bytes.as_slice()).map_err(io_error)?;
                } else {
                    nodes.remove(id.0).map_err(io_error)?;
                }
            }

            let mut relationships = write_txn.open_table(RELATIONSHIPS).map_err(io_error)?;
            for (id, record) in &diff.relationships {
                if let Some(bytes) = record {
                    relationships
                        .insert(id.0, bytes.as_slice())
                        .map_err(io_error)?;
                } else {
                    relationships.remove(id.0).map_err(io_error)?;
                }
            }

            let mut indexes = write_txn.open_table(INDEXES).map_err(io_error)?;
            for (name, data) in &diff.indexes {
                if let Some(bytes) = data {
                    indexes
                        .insert(name.as_str(), bytes.as_slice())
                        .map_err(io_error)?;
                } else {
                    indexes.remove(name.as_str()).map_err(io_error)?;
                }
            }

            let mut meta = write_txn.open_table(METADATA).map_err(io_error)?;
            meta.insert(META_NEXT_NODE, diff.next_node_id)
                .map_err(io_error)?;
            meta.insert(META_NEXT_RELATIONSHIP, diff.next_relationship_id)
                .map_err(io_error)?;
        }
        write_txn.commit().map_err(io_error)?;
        Ok(changes)
    }
}

// =============================================================================
// STATE DIFF
// =============================================================================

/// Encoded records that changed in one unit of work; `None` means deleted.
#[derive(Debug, Default)]
struct StateDiff {
    nodes: BTreeMap<NodeId, Option<Vec<u8>>>,
    relationships: BTreeMap<RelationshipId, Option<Vec<u8>>>,
    indexes: BTreeMap<String, Option<Vec<u8>>>,
    next_node_id: u64,
    next_relationship_id: u64,
    counters_changed: bool,
}

impl StateDiff {
    fn between(before: &GraphState, after: &GraphState) -> Result<Self, StoreError> {
        Ok(Self {
            nodes: Self::changed(&before.nodes, &after.nodes)?,
            relationships: Self::changed(&before.relationships, &after.relationships)?,
            indexes: Self::changed(&before.indexes, &after.indexes)?,
            next_node_id: after.next_node_id,
            next_relationship_id: after.next_relationship_id,
            counters_changed: before.next_node_id != after.next_node_id
                || before.next_relationship_id != after.next_relationship_id,
        })
    }

    fn changed<K: Ord + Clone, V: PartialEq + Serialize>(
        before: &BTreeMap<K, V>,
        after: &BTreeMap<K, V>,
    ) -> Result<BTreeMap<K, Option<Vec<u8>>>, StoreError> {
        let mut out = BTreeMap::new();
        for (key, value) in after {
            if before.get(key) != Some(value) {
                out.insert(key.clone(), Some(encode(value)?));
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                out.insert(key.clone(), None);
            }
        }
        Ok(out)
    }

    fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len() + self.indexes.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0 && !self.counters_changed
    }
}

// =============================================================================
// GRAPH DATABASE
// =============================================================================

impl GraphDatabase for RedbGraph {
    fn begin_tx(&self) -> Result<(), StoreError> {
        self.memory.begin_tx()
    }

    fn commit_tx(&self) -> Result<(), StoreError> {
        match self.persist() {
            Ok(changes) => {
                debug!(changes, "unit of work persisted");
                self.memory.commit_tx()
            }
            Err(e) => {
                warn!(error = %e, "persisting unit of work failed, rolling back");
                self.memory.rollback_tx()?;
                Err(e)
            }
        }
    }

    fn rollback_tx(&self) -> Result<(), StoreError> {
        self.memory.rollback_tx()
    }

    fn in_transaction(&self) -> bool {
        self.memory.in_transaction()
    }

    fn create_node(&self) -> Result<NodeId, StoreError> {
        self.memory.create_node()
    }

    fn delete_node(&self, node: NodeId) -> Result<(), StoreError> {
        self.memory.delete_node(node)
    }

    fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelationshipId, StoreError> {
        self.memory.create_relationship(start, end, rel_type)
    }

    fn delete_relationship(&self, relationship: RelationshipId) -> Result<(), StoreError> {
        self.memory.delete_relationship(relationship)
    }

    fn contains(&self, element: ElementRef) -> Result<bool, StoreError> {
        self.memory.contains(element)
    }

    fn relationship(&self, id: RelationshipId) -> Result<Option<Relationship>, StoreError> {
        self.memory.relationship(id)
    }

    fn relationships(
        &self,
        node: NodeId,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Relationship>, StoreError> {
        self.memory.relationships(node, rel_type, direction)
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>, StoreError> {
        self.memory.all_nodes()
    }

    fn node_count(&self) -> Result<usize, StoreError> {
        self.memory.node_count()
    }

    fn relationship_count(&self) -> Result<usize, StoreError> {
        self.memory.relationship_count()
    }

    fn property(&self, element: ElementRef, key: &str) -> Result<Option<Value>, StoreError> {
        self.memory.property(element, key)
    }

    fn properties(&self, element: ElementRef) -> Result<Properties, StoreError> {
        self.memory.properties(element)
    }

    fn set_property(
        &self,
        element: ElementRef,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.memory.set_property(element, key, value)
    }

    fn remove_property(&self, element: ElementRef, key: &str) -> Result<Option<Value>, StoreError> {
        self.memory.remove_property(element, key)
    }

    fn labels(&self, node: NodeId) -> Result<BTreeSet<String>, StoreError> {
        self.memory.labels(node)
    }

    fn add_label(&self, node: NodeId, label: &str) -> Result<(), StoreError> {
        self.memory.add_label(node, label)
    }

    fn remove_label(&self, node: NodeId, label: &str) -> Result<(), StoreError> {
        self.memory.remove_label(node, label)
    }

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeId>, StoreError> {
        self.memory.nodes_with_label(label)
    }

    fn index_add(
        &self,
        index: &str,
        kind: IndexKind,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<(), StoreError> {
        self.memory.index_add(index, kind, key, value, element)
    }

    fn index_remove(
        &self,
        index: &str,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<bool, StoreError> {
        self.memory.index_remove(index, key, value, element)
    }

    fn index_get(&self, index: &str, key: &str, value: &str) -> Result<Vec<ElementRef>, StoreError> {
        self.memory.index_get(index, key, value)
    }

    fn index_query(&self, index: &str, expression: &str) -> Result<Vec<ElementRef>, StoreError> {
        self.memory.index_query(index, expression)
    }

    fn index_remove_element(&self, element: ElementRef) -> Result<usize, StoreError> {
        self.memory.index_remove_element(element)
    }

    fn index_kind(&self, index: &str) -> Result<Option<IndexKind>, StoreError> {
        self.memory.index_kind(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn in_tx<R>(graph: &RedbGraph, f: impl FnOnce(&RedbGraph) -> R) -> R {
        graph.begin_tx().expect("begin");
        let result = f(graph);
        graph.commit_tx().expect("commit");
        result
    }

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        let (a, b, rel) = {
            let graph = RedbGraph::open(&db_path).expect("open db");
            in_tx(&graph, |g| {
                let a = g.create_node().expect("node");
                let b = g.create_node().expect("node");
                let rel = g.create_relationship(a, b, "KNOWS").expect("rel");
                g.set_property(ElementRef::Node(a), "name", Value::from("alice"))
                    .expect("prop");
                g.add_label(a, "Person").expect("label");
                g.index_add("Person", IndexKind::Exact, "name", "alice", ElementRef::Node(a))
                    .expect("index");
                (a, b, rel)
            })
        };

        let graph = RedbGraph::open(&db_path).expect("reopen");
        assert_eq!(graph.node_count().expect("count"), 2);
        assert_eq!(graph.relationship_count().expect("count"), 1);
        assert_eq!(
            graph.property(ElementRef::Node(a), "name").expect("prop"),
            Some(Value::from("alice"))
        );
        assert!(graph.labels(a).expect("labels").contains("Person"));
        assert_eq!(
            graph.index_get("Person", "name", "alice").expect("index"),
            vec![ElementRef::Node(a)]
        );
        let loaded = graph.relationship(rel).expect("rel").expect("present");
        assert_eq!((loaded.start, loaded.end), (a, b));
    }

    #[test]
    fn recovery_next_ids_preserved() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        let first = {
            let graph = RedbGraph::open(&db_path).expect("open db");
            in_tx(&graph, |g| {
                let n = g.create_node().expect("node");
                g.delete_node(n).expect("delete");
                n
            })
        };

        let graph = RedbGraph::open(&db_path).expect("reopen");
        let second = in_tx(&graph, |g| g.create_node().expect("node"));
        assert_ne!(first, second);
    }

    #[test]
    fn rolled_back_work_is_not_persisted() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let graph = RedbGraph::open(&db_path).expect("open db");
            graph.begin_tx().expect("begin");
            graph.create_node().expect("node");
            graph.rollback_tx().expect("rollback");
        }
        let graph = RedbGraph::open(&db_path).expect("reopen");
        assert_eq!(graph.node_count().expect("count"), 0);
    }

    #[test]
    fn deletions_are_persisted() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let graph = RedbGraph::open(&db_path).expect("open db");
            let (a, rel) = in_tx(&graph, |g| {
                let a = g.create_node().expect("node");
                let b = g.create_node().expect("node");
                (a, g.create_relationship(a, b, "KNOWS").expect("rel"))
            });
            in_tx(&graph, |g| {
                g.delete_relationship(rel).expect("delete rel");
                g.delete_node(a).expect("delete node");
            });
        }
        let graph = RedbGraph::open(&db_path).expect("reopen");
        assert_eq!(graph.node_count().expect("count"), 1);
        assert_eq!(graph.relationship_count().expect("count"), 0);
    }

    #[test]
    fn recovery_multiple_reopen_cycles() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        for round in 1..=3usize {
            let graph = RedbGraph::open(&db_path).expect("open db");
            in_tx(&graph, |g| g.create_node().expect("node"));
            assert_eq!(graph.node_count().expect("count"), round);
        }
    }

    #[test]
    fn recovery_compact_and_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let mut graph = RedbGraph::open(&db_path).expect("open db");
            in_tx(&graph, |g| g.create_node().expect("node"));
            graph.compact().expect("compact");
        }
        let graph = RedbGraph::open(&db_path).expect("reopen");
        assert_eq!(graph.node_count().expect("count"), 1);
    }
}
