//! # Storage Module
//!
//! Persistent stores behind the `GraphDatabase` seam.
//!
//! The in-memory store lives in [`crate::graph`]; this module adds the
//! disk-backed one.

pub mod redb_graph;

pub use redb_graph::RedbGraph;
