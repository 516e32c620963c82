//! # Mapping Primitives
//!
//! Hardcoded names and limits shared by the mapping core and the stores.
//!
//! These are part of the persisted layout: changing a name orphans the type
//! records and index entries written under the old one.

/// Property holding the most-derived type name under indexing type representation.
pub const TYPE_PROPERTY: &str = "__type__";

/// Index holding one entry per type in an element's hierarchy.
pub const TYPES_INDEX: &str = "__types__";

/// Key used for entries of [`TYPES_INDEX`].
pub const TYPES_INDEX_KEY: &str = "className";

/// Prefix marking the most-derived type label under label type representation.
pub const CONCRETE_LABEL_PREFIX: &str = "_";

/// Shared index name for GLOBAL-scoped node properties.
pub const GLOBAL_NODE_INDEX: &str = "node";

/// Shared index name for GLOBAL-scoped relationship properties.
pub const GLOBAL_RELATIONSHIP_INDEX: &str = "relationship";

/// Maximum traversal depth for traversal-derived fields.
///
/// Traversal descriptions asking for more are clamped.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Maximum relationship depth an eager mapping policy may request.
pub const MAX_EAGER_DEPTH: usize = 16;

/// Magic bytes stored in the redb metadata table.
pub const MAGIC_BYTES: &[u8; 4] = b"TRLS";

/// Current on-disk layout version of the redb store.
pub const FORMAT_VERSION: u64 = 1;
