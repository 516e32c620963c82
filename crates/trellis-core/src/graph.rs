//! # Graph Store
//!
//! The store collaborator contract and the in-memory store.
//!
//! The mapping core talks to the store exclusively through `GraphDatabase`:
//! nodes, relationships, properties, labels, index entries, traversals and
//! the unit-of-work boundary. All methods take `&self`; implementations use
//! interior locking so one store can be shared by reference across the
//! mapping components.
//!
//! `MemoryGraph` keeps everything in `BTreeMap`s for deterministic ordering
//! and implements the unit of work as snapshot/restore.

use crate::fulltext::FulltextQuery;
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::{
    Direction, ElementRef, NodeId, Path, Properties, Relationship, RelationshipId, StoreError,
    Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// =============================================================================
// INDEX KIND
// =============================================================================

/// How an index matches its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact `(key, value)` lookups.
    #[default]
    Exact,
    /// Tokenized values queried with full-text expressions.
    Fulltext,
}

// =============================================================================
// TRAVERSAL DESCRIPTION
// =============================================================================

/// A breadth-first traversal request.
///
/// With no relationship filters every relationship is followed in both
/// directions. Nodes are visited at most once (node-global uniqueness).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalDescription {
    /// Relationship types to follow, with their direction.
    pub relationships: Vec<(String, Direction)>,
    /// Paths shorter than this are not returned (1 skips the start node).
    pub min_depth: usize,
    /// Paths are not expanded beyond this length.
    pub max_depth: usize,
}

impl Default for TraversalDescription {
    fn default() -> Self {
        Self {
            relationships: Vec::new(),
            min_depth: 1,
            max_depth: MAX_TRAVERSAL_DEPTH,
        }
    }
}

impl TraversalDescription {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow relationships of `rel_type` in `direction`.
    #[must_use]
    pub fn relationships(mut self, rel_type: impl Into<String>, direction: Direction) -> Self {
        self.relationships.push((rel_type.into(), direction));
        self
    }

    /// Limit the traversal depth.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Also return the zero-length path at the start node.
    #[must_use]
    pub fn include_start(mut self) -> Self {
        self.min_depth = 0;
        self
    }
}

// =============================================================================
// GRAPHDATABASE TRAIT
// =============================================================================

/// The store collaborator.
///
/// Writes must happen inside a unit of work opened with `begin_tx`; the store
/// is responsible for reverting every write of a rolled-back unit together.
pub trait GraphDatabase: Send + Sync {
    // --- unit of work ---------------------------------------------------------

    /// Open a unit of work. Fails if one is already active.
    fn begin_tx(&self) -> Result<(), StoreError>;

    /// Make every write of the active unit of work durable.
    fn commit_tx(&self) -> Result<(), StoreError>;

    /// Revert every write of the active unit of work.
    fn rollback_tx(&self) -> Result<(), StoreError>;

    /// Whether a unit of work is active.
    fn in_transaction(&self) -> bool;

    // --- elements -------------------------------------------------------------

    fn create_node(&self) -> Result<NodeId, StoreError>;

    /// Delete a node. Fails while relationships are still attached.
    fn delete_node(&self, node: NodeId) -> Result<(), StoreError>;

    fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelationshipId, StoreError>;

    fn delete_relationship(&self, relationship: RelationshipId) -> Result<(), StoreError>;

    /// Whether the element exists.
    fn contains(&self, element: ElementRef) -> Result<bool, StoreError>;

    fn relationship(&self, id: RelationshipId) -> Result<Option<Relationship>, StoreError>;

    /// Relationships attached to `node`, optionally filtered by type, in id order.
    fn relationships(
        &self,
        node: NodeId,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Relationship>, StoreError>;

    fn all_nodes(&self) -> Result<Vec<NodeId>, StoreError>;

    fn node_count(&self) -> Result<usize, StoreError>;

    fn relationship_count(&self) -> Result<usize, StoreError>;

    // --- properties -----------------------------------------------------------

    fn property(&self, element: ElementRef, key: &str) -> Result<Option<Value>, StoreError>;

    fn properties(&self, element: ElementRef) -> Result<Properties, StoreError>;

    fn set_property(&self, element: ElementRef, key: &str, value: Value)
    -> Result<(), StoreError>;

    fn remove_property(&self, element: ElementRef, key: &str)
    -> Result<Option<Value>, StoreError>;

    // --- labels ---------------------------------------------------------------

    /// Whether nodes carry labels. Stores without labels fail label calls.
    fn supports_labels(&self) -> bool {
        true
    }

    fn labels(&self, node: NodeId) -> Result<BTreeSet<String>, StoreError>;

    fn add_label(&self, node: NodeId, label: &str) -> Result<(), StoreError>;

    fn remove_label(&self, node: NodeId, label: &str) -> Result<(), StoreError>;

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeId>, StoreError>;

    // --- indexes --------------------------------------------------------------

    /// Add an entry, creating the index with `kind` on first use.
    fn index_add(
        &self,
        index: &str,
        kind: IndexKind,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<(), StoreError>;

    /// Remove one entry. Returns whether it existed.
    fn index_remove(
        &self,
        index: &str,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<bool, StoreError>;

    /// Exact lookup.
    fn index_get(&self, index: &str, key: &str, value: &str)
    -> Result<Vec<ElementRef>, StoreError>;

    /// Full-text query; see [`crate::fulltext`] for the expression syntax.
    fn index_query(&self, index: &str, expression: &str) -> Result<Vec<ElementRef>, StoreError>;

    /// Remove every entry referencing `element`, across all indexes.
    fn index_remove_element(&self, element: ElementRef) -> Result<usize, StoreError>;

    /// The kind of an existing index.
    fn index_kind(&self, index: &str) -> Result<Option<IndexKind>, StoreError>;

    // --- traversal ------------------------------------------------------------

    /// Breadth-first traversal from `start`.
    ///
    /// Depth is clamped to [`MAX_TRAVERSAL_DEPTH`].
    fn traverse(
        &self,
        start: NodeId,
        description: &TraversalDescription,
    ) -> Result<Vec<Path>, StoreError> {
        if !self.contains(ElementRef::Node(start))? {
            return Err(StoreError::NodeNotFound(start));
        }
        let max_depth = description.max_depth.min(MAX_TRAVERSAL_DEPTH);

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut paths = Vec::new();

        visited.insert(start);
        queue.push_back(Path::single(start));

        while let Some(path) = queue.pop_front() {
            if path.length() >= description.min_depth {
                paths.push(path.clone());
            }
            if path.length() >= max_depth {
                continue;
            }
            let Some(current) = path.end_node() else {
                continue;
            };

            let mut expanded = BTreeMap::new();
            if description.relationships.is_empty() {
                for rel in self.relationships(current, None, Direction::Both)? {
                    expanded.insert(rel.id, rel);
                }
            } else {
                for (rel_type, direction) in &description.relationships {
                    for rel in self.relationships(current, Some(rel_type), *direction)? {
                        expanded.insert(rel.id, rel);
                    }
                }
            }

            for rel in expanded.into_values() {
                let next = rel.other_node(current);
                if visited.insert(next) {
                    queue.push_back(path.extended(rel.id, next));
                }
            }
        }

        Ok(paths)
    }
}

// =============================================================================
// IN-MEMORY STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct NodeRecord {
    pub(crate) labels: BTreeSet<String>,
    pub(crate) properties: Properties,
    pub(crate) relationships: BTreeSet<RelationshipId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RelationshipRecord {
    pub(crate) start: NodeId,
    pub(crate) end: NodeId,
    pub(crate) rel_type: String,
    pub(crate) properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct IndexData {
    pub(crate) kind: IndexKind,
    /// (key, value) -> elements
    pub(crate) entries: BTreeMap<(String, String), BTreeSet<ElementRef>>,
}

/// Complete store contents. Cloned as the unit-of-work snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GraphState {
    pub(crate) nodes: BTreeMap<NodeId, NodeRecord>,
    pub(crate) relationships: BTreeMap<RelationshipId, RelationshipRecord>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
    pub(crate) next_node_id: u64,
    pub(crate) next_relationship_id: u64,
}

impl GraphState {
    fn node(&self, node: NodeId) -> Result<&NodeRecord, StoreError> {
        self.nodes.get(&node).ok_or(StoreError::NodeNotFound(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeRecord, StoreError> {
        self.nodes.get_mut(&node).ok_or(StoreError::NodeNotFound(node))
    }

    fn rel(&self, id: RelationshipId) -> Result<&RelationshipRecord, StoreError> {
        self.relationships
            .get(&id)
            .ok_or(StoreError::RelationshipNotFound(id))
    }

    fn props(&self, element: ElementRef) -> Result<&Properties, StoreError> {
        match element {
            ElementRef::Node(id) => Ok(&self.node(id)?.properties),
            ElementRef::Relationship(id) => Ok(&self.rel(id)?.properties),
        }
    }

    fn props_mut(&mut self, element: ElementRef) -> Result<&mut Properties, StoreError> {
        match element {
            ElementRef::Node(id) => Ok(&mut self.node_mut(id)?.properties),
            ElementRef::Relationship(id) => self
                .relationships
                .get_mut(&id)
                .map(|r| &mut r.properties)
                .ok_or(StoreError::RelationshipNotFound(id)),
        }
    }

    fn to_relationship(id: RelationshipId, record: &RelationshipRecord) -> Relationship {
        Relationship {
            id,
            start: record.start,
            end: record.end,
            rel_type: record.rel_type.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: GraphState,
    /// Present while a unit of work is active.
    snapshot: Option<GraphState>,
}

// =============================================================================
// MEMORY GRAPH
// =============================================================================

/// In-memory graph store.
///
/// A unit of work snapshots the whole state on `begin_tx` and restores it on
/// `rollback_tx`, so property, index and label writes revert together.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: RwLock<Inner>,
}

impl MemoryGraph {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: GraphState) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state,
                snapshot: None,
            }),
        }
    }

    /// Run `f` over the state before and after the active unit of work.
    pub(crate) fn with_pending<R>(
        &self,
        f: impl FnOnce(&GraphState, &GraphState) -> R,
    ) -> Result<R, StoreError> {
        let inner = self.guard()?;
        let before = inner.snapshot.as_ref().ok_or(StoreError::NoTransaction)?;
        Ok(f(before, &inner.state))
    }

    fn guard(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn guard_mut(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn read<R>(&self, f: impl FnOnce(&GraphState) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let inner = self.guard()?;
        f(&inner.state)
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut GraphState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut inner = self.guard_mut()?;
        if inner.snapshot.is_none() {
            return Err(StoreError::NoTransaction);
        }
        f(&mut inner.state)
    }
}

impl GraphDatabase for MemoryGraph {
    fn begin_tx(&self) -> Result<(), StoreError> {
        let mut inner = self.guard_mut()?;
        if inner.snapshot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    fn commit_tx(&self) -> Result<(), StoreError> {
        let mut inner = self.guard_mut()?;
        inner
            .snapshot
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn rollback_tx(&self) -> Result<(), StoreError> {
        let mut inner = self.guard_mut()?;
        let snapshot = inner.snapshot.take().ok_or(StoreError::NoTransaction)?;
        inner.state = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.guard().map(|g| g.snapshot.is_some()).unwrap_or(false)
    }

    fn create_node(&self) -> Result<NodeId, StoreError> {
        self.write(|s| {
            let id = NodeId(s.next_node_id);
            s.next_node_id = s.next_node_id.saturating_add(1);
            s.nodes.insert(id, NodeRecord::default());
            Ok(id)
        })
    }

    fn delete_node(&self, node: NodeId) -> Result<(), StoreError> {
        self.write(|s| {
            if !s.node(node)?.relationships.is_empty() {
                return Err(StoreError::NodeHasRelationships(node));
            }
            s.nodes.remove(&node);
            Ok(())
        })
    }

    fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelationshipId, StoreError> {
        self.write(|s| {
            s.node(start)?;
            s.node(end)?;
            let id = RelationshipId(s.next_relationship_id);
            s.next_relationship_id = s.next_relationship_id.saturating_add(1);
            s.relationships.insert(
                id,
                RelationshipRecord {
                    start,
                    end,
                    rel_type: rel_type.to_string(),
                    properties: Properties::new(),
                },
            );
            s.node_mut(start)?.relationships.insert(id);
            s.node_mut(end)?.relationships.insert(id);
            Ok(id)
        })
    }

    fn delete_relationship(&self, relationship: RelationshipId) -> Result<(), StoreError> {
        self.write(|s| {
            let record = s
                .relationships
                .remove(&relationship)
                .ok_or(StoreError::RelationshipNotFound(relationship))?;
            for node in [record.start, record.end] {
                if let Some(n) = s.nodes.get_mut(&node) {
                    n.relationships.remove(&relationship);
                }
            }
            Ok(())
        })
    }

    fn contains(&self, element: ElementRef) -> Result<bool, StoreError> {
        self.read(|s| {
            Ok(match element {
                ElementRef::Node(id) => s.nodes.contains_key(&id),
                ElementRef::Relationship(id) => s.relationships.contains_key(&id),
            })
        })
    }

    fn relationship(&self, id: RelationshipId) -> Result<Option<Relationship>, StoreError> {
        self.read(|s| {
            Ok(s.relationships
                .get(&id)
                .map(|r| GraphState::to_relationship(id, r)))
        })
    }

    fn relationships(
        &self,
        node: NodeId,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Relationship>, StoreError> {
        self.read(|s| {
            let mut result = Vec::new();
            for rel_id in &s.node(node)?.relationships {
                let record = s.rel(*rel_id)?;
                if rel_type.is_some_and(|t| t != record.rel_type) {
                    continue;
                }
                let matches = match direction {
                    Direction::Outgoing => record.start == node,
                    Direction::Incoming => record.end == node,
                    Direction::Both => true,
                };
                if matches {
                    result.push(GraphState::to_relationship(*rel_id, record));
                }
            }
            Ok(result)
        })
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>, StoreError> {
        self.read(|s| Ok(s.nodes.keys().copied().collect()))
    }

    fn node_count(&self) -> Result<usize, StoreError> {
        self.read(|s| Ok(s.nodes.len()))
    }

    fn relationship_count(&self) -> Result<usize, StoreError> {
        self.read(|s| Ok(s.relationships.len()))
    }

    fn property(&self, element: ElementRef, key: &str) -> Result<Option<Value>, StoreError> {
        self.read(|s| Ok(s.props(element)?.get(key).cloned()))
    }

    fn properties(&self, element: ElementRef) -> Result<Properties, StoreError> {
        self.read(|s| Ok(s.props(element)?.clone()))
    }

    fn set_property(
        &self,
        element: ElementRef,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.write(|s| {
            s.props_mut(element)?.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove_property(
        &self,
        element: ElementRef,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.write(|s| Ok(s.props_mut(element)?.remove(key)))
    }

    fn labels(&self, node: NodeId) -> Result<BTreeSet<String>, StoreError> {
        self.read(|s| Ok(s.node(node)?.labels.clone()))
    }

    fn add_label(&self, node: NodeId, label: &str) -> Result<(), StoreError> {
        self.write(|s| {
            s.node_mut(node)?.labels.insert(label.to_string());
            Ok(())
        })
    }

    fn remove_label(&self, node: NodeId, label: &str) -> Result<(), StoreError> {
        self.write(|s| {
            s.node_mut(node)?.labels.remove(label);
            Ok(())
        })
    }

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeId>, StoreError> {
        self.read(|s| {
            Ok(s.nodes
                .iter()
                .filter(|(_, n)| n.labels.contains(label))
                .map(|(id, _)| *id)
                .collect())
        })
    }

    fn index_add(
        &self,
        index: &str,
        kind: IndexKind,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<(), StoreError> {
        self.write(|s| {
            let data = s.indexes.entry(index.to_string()).or_insert_with(|| IndexData {
                kind,
                entries: BTreeMap::new(),
            });
            if data.kind != kind {
                return Err(StoreError::IndexConflict(format!(
                    "index '{}' exists as {:?}, requested {:?}",
                    index, data.kind, kind
                )));
            }
            data.entries
                .entry((key.to_string(), value.to_string()))
                .or_default()
                .insert(element);
            Ok(())
        })
    }

    fn index_remove(
        &self,
        index: &str,
        key: &str,
        value: &str,
        element: ElementRef,
    ) -> Result<bool, StoreError> {
        self.write(|s| {
            let Some(data) = s.indexes.get_mut(index) else {
                return Ok(false);
            };
            let entry_key = (key.to_string(), value.to_string());
            let Some(elements) = data.entries.get_mut(&entry_key) else {
                return Ok(false);
            };
            let removed = elements.remove(&element);
            if elements.is_empty() {
                data.entries.remove(&entry_key);
            }
            Ok(removed)
        })
    }

    fn index_get(
        &self,
        index: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<ElementRef>, StoreError> {
        self.read(|s| {
            Ok(s.indexes
                .get(index)
                .and_then(|data| data.entries.get(&(key.to_string(), value.to_string())))
                .map(|elements| elements.iter().copied().collect())
                .unwrap_or_default())
        })
    }

    fn index_query(&self, index: &str, expression: &str) -> Result<Vec<ElementRef>, StoreError> {
        let query = FulltextQuery::parse(expression);
        self.read(|s| {
            let Some(data) = s.indexes.get(index) else {
                return Ok(Vec::new());
            };
            let mut per_element: BTreeMap<ElementRef, Vec<(&str, &str)>> = BTreeMap::new();
            for ((key, value), elements) in &data.entries {
                for element in elements {
                    per_element
                        .entry(*element)
                        .or_default()
                        .push((key.as_str(), value.as_str()));
                }
            }
            Ok(per_element
                .into_iter()
                .filter(|(_, entries)| query.matches(entries.iter().copied()))
                .map(|(element, _)| element)
                .collect())
        })
    }

    fn index_remove_element(&self, element: ElementRef) -> Result<usize, StoreError> {
        self.write(|s| {
            let mut removed = 0usize;
            for data in s.indexes.values_mut() {
                data.entries.retain(|_, elements| {
                    if elements.remove(&element) {
                        removed = removed.saturating_add(1);
                    }
                    !elements.is_empty()
                });
            }
            Ok(removed)
        })
    }

    fn index_kind(&self, index: &str) -> Result<Option<IndexKind>, StoreError> {
        self.read(|s| Ok(s.indexes.get(index).map(|d| d.kind)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn in_tx<R>(graph: &MemoryGraph, f: impl FnOnce(&MemoryGraph) -> R) -> R {
        graph.begin_tx().expect("begin");
        let result = f(graph);
        graph.commit_tx().expect("commit");
        result
    }

    #[test]
    fn writes_require_transaction() {
        let graph = MemoryGraph::new();
        assert!(matches!(graph.create_node(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn nested_begin_is_rejected() {
        let graph = MemoryGraph::new();
        graph.begin_tx().expect("begin");
        assert!(matches!(graph.begin_tx(), Err(StoreError::TransactionActive)));
        graph.rollback_tx().expect("rollback");
        assert!(!graph.in_transaction());
    }

    #[test]
    fn rollback_reverts_properties_and_index_together() {
        let graph = MemoryGraph::new();
        let node = in_tx(&graph, |g| {
            let node = g.create_node().expect("node");
            g.set_property(ElementRef::Node(node), "name", Value::from("alpha"))
                .expect("set");
            node
        });

        graph.begin_tx().expect("begin");
        graph
            .set_property(ElementRef::Node(node), "name", Value::from("beta"))
            .expect("set");
        graph
            .index_add("Group", IndexKind::Exact, "name", "beta", ElementRef::Node(node))
            .expect("index");
        graph.rollback_tx().expect("rollback");

        assert_eq!(
            graph.property(ElementRef::Node(node), "name").expect("get"),
            Some(Value::from("alpha"))
        );
        assert!(graph.index_get("Group", "name", "beta").expect("get").is_empty());
    }

    #[test]
    fn relationships_by_type_and_direction() {
        let graph = MemoryGraph::new();
        let (a, b, c) = in_tx(&graph, |g| {
            let a = g.create_node().expect("a");
            let b = g.create_node().expect("b");
            let c = g.create_node().expect("c");
            g.create_relationship(a, b, "persons").expect("rel");
            g.create_relationship(c, a, "persons").expect("rel");
            g.create_relationship(a, c, "friends").expect("rel");
            (a, b, c)
        });

        let out = graph
            .relationships(a, Some("persons"), Direction::Outgoing)
            .expect("rels");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].end, b);

        let incoming = graph
            .relationships(a, Some("persons"), Direction::Incoming)
            .expect("rels");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].start, c);

        assert_eq!(graph.relationships(a, None, Direction::Both).expect("rels").len(), 3);
    }

    #[test]
    fn delete_node_with_relationships_fails() {
        let graph = MemoryGraph::new();
        graph.begin_tx().expect("begin");
        let a = graph.create_node().expect("a");
        let b = graph.create_node().expect("b");
        let rel = graph.create_relationship(a, b, "KNOWS").expect("rel");

        assert!(matches!(
            graph.delete_node(a),
            Err(StoreError::NodeHasRelationships(_))
        ));
        graph.delete_relationship(rel).expect("delete rel");
        graph.delete_node(a).expect("delete node");
        graph.commit_tx().expect("commit");

        assert!(!graph.contains(ElementRef::Node(a)).expect("contains"));
        assert!(graph.contains(ElementRef::Node(b)).expect("contains"));
    }

    #[test]
    fn traverse_skips_start_and_respects_depth() {
        let graph = MemoryGraph::new();
        let (a, b, c) = in_tx(&graph, |g| {
            let a = g.create_node().expect("a");
            let b = g.create_node().expect("b");
            let c = g.create_node().expect("c");
            g.create_relationship(a, b, "NEXT").expect("rel");
            g.create_relationship(b, c, "NEXT").expect("rel");
            (a, b, c)
        });

        let all = graph
            .traverse(a, &TraversalDescription::new().relationships("NEXT", Direction::Outgoing))
            .expect("traverse");
        let ends: Vec<_> = all.iter().filter_map(Path::end_node).collect();
        assert_eq!(ends, vec![b, c]);

        let shallow = graph
            .traverse(
                a,
                &TraversalDescription::new()
                    .relationships("NEXT", Direction::Outgoing)
                    .max_depth(1)
                    .include_start(),
            )
            .expect("traverse");
        let ends: Vec<_> = shallow.iter().filter_map(Path::end_node).collect();
        assert_eq!(ends, vec![a, b]);
    }

    #[test]
    fn traverse_missing_start_fails() {
        let graph = MemoryGraph::new();
        let result = graph.traverse(NodeId(99), &TraversalDescription::new());
        assert!(matches!(result, Err(StoreError::NodeNotFound(_))));
    }

    #[test]
    fn index_kind_conflict_is_rejected() {
        let graph = MemoryGraph::new();
        graph.begin_tx().expect("begin");
        let n = ElementRef::Node(graph.create_node().expect("node"));
        graph
            .index_add("search", IndexKind::Fulltext, "k", "v", n)
            .expect("add");
        let result = graph.index_add("search", IndexKind::Exact, "k", "v", n);
        assert!(matches!(result, Err(StoreError::IndexConflict(_))));
        graph.rollback_tx().expect("rollback");
    }

    #[test]
    fn index_query_and_remove_element() {
        let graph = MemoryGraph::new();
        graph.begin_tx().expect("begin");
        let a = ElementRef::Node(graph.create_node().expect("a"));
        let b = ElementRef::Node(graph.create_node().expect("b"));
        graph
            .index_add("search", IndexKind::Fulltext, "text", "Graph Databases", a)
            .expect("add");
        graph
            .index_add("search", IndexKind::Fulltext, "text", "Graph Theory", b)
            .expect("add");

        assert_eq!(graph.index_query("search", "graph").expect("query"), vec![a, b]);
        assert_eq!(graph.index_query("search", "data*").expect("query"), vec![a]);

        assert_eq!(graph.index_remove_element(a).expect("remove"), 1);
        assert_eq!(graph.index_query("search", "graph").expect("query"), vec![b]);
        graph.commit_tx().expect("commit");
    }
}
