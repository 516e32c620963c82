//! # Configuration
//!
//! The `trellis.toml` file: store location, mapping options and the schema.
//!
//! ```toml
//! [store]
//! path = "trellis.redb"
//!
//! [mapping]
//! node_type_representation = "label"
//! default_index_scope = "class"
//!
//! [[types]]
//! name = "Person"
//!
//! [[types.fields]]
//! name = "name"
//! type = "text"
//! index = { scope = "global" }
//! ```

use crate::error::AppError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use trellis_core::{Direction, IndexScope, MappingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "trellis.toml";
pub const DEFAULT_STORE_PATH: &str = "trellis.redb";

/// Maximum accepted size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub mapping: MappingConfig,
    pub types: Vec<TypeConfig>,
    pub views: Vec<ViewConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file; relative paths resolve against the config file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Node,
    Relationship,
}

/// One `[[types]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub extends: Vec<String>,
    /// Store relationship type of a relationship entity.
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// One `[[types.fields]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    /// `bool`, `int`, `float`, `text`, `list<T>`, `Type`, `[Type]`, `nodes`
    /// or `relationships`.
    #[serde(rename = "type")]
    pub value_type: String,
    pub index: Option<IndexConfig>,
    pub relationship: Option<RelationshipConfig>,
    pub traversal: Option<TraversalConfig>,
    pub computed: Option<ComputedConfig>,
    #[serde(default)]
    pub property: bool,
    #[serde(default)]
    pub transient: bool,
    #[serde(default)]
    pub start_node: bool,
    #[serde(default)]
    pub end_node: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub name: Option<String>,
    pub key: Option<String>,
    pub scope: Option<IndexScope>,
    pub fulltext: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelationshipConfig {
    #[serde(rename = "type")]
    pub rel_type: Option<String>,
    pub direction: Direction,
    pub read_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraversalConfig {
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub direction: Direction,
    pub max_depth: Option<usize>,
}

/// Degree of the bound node, optionally filtered by relationship type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputedConfig {
    #[serde(rename = "degree")]
    pub rel_type: Option<String>,
    pub direction: Direction,
}

/// One `[[views]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewConfig {
    pub name: String,
    #[serde(default)]
    pub accessors: Vec<AccessorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessorConfig {
    pub name: String,
    pub column: Option<String>,
    /// `raw`, `node`, `relationship`, `path`, a value type, `view:Name` or
    /// an entity type name.
    pub target: String,
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path`, resolving a relative store path against its directory.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(AppError::Config(format!(
                "{} exceeds {MAX_CONFIG_FILE_SIZE} bytes",
                path.display()
            )));
        }
        let mut config = Self::from_toml(&std::fs::read_to_string(path)?)?;
        if config.store.path.is_relative()
            && let Some(dir) = path.parent()
        {
            config.store.path = dir.join(&config.store.path);
        }
        Ok(config)
    }
}
