//! # Trellis CLI Module
//!
//! This module implements the CLI interface for Trellis.
//!
//! ## Available Commands
//!
//! - `types` - List the mapped types and views of the schema
//! - `create` - Create a node entity
//! - `relate` - Create a relationship entity between two nodes
//! - `show` - Show one entity
//! - `set` - Write one field of an entity
//! - `link` / `unlink` - Add or remove a related entity
//! - `find` / `count` - Enumerate instances of a type (subtypes included)
//! - `lookup` / `search` - Exact and full-text index queries
//! - `remove` - Delete an entity and its bookkeeping

mod commands;

use crate::config::{AppConfig, DEFAULT_CONFIG_FILE};
use crate::error::AppError;
use crate::schema;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{MappingInfrastructure, RedbGraph};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Trellis - object-graph mapping over a property graph store
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Path to the graph database (overrides `[store] path`)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List mapped types and views
    Types,

    /// Create a node entity
    Create {
        /// Mapped type name
        type_name: String,

        /// Field assignment, repeatable
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },

    /// Create a relationship entity
    Relate {
        /// Mapped relationship type name
        type_name: String,

        /// Start node element
        start: String,

        /// End node element
        end: String,

        /// Field assignment, repeatable
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },

    /// Show an entity
    Show {
        /// Element reference (`3`, `node:3` or `rel:3`)
        element: String,
    },

    /// Write a scalar field
    Set {
        element: String,
        field: String,
        /// New value (`null` clears the field)
        value: String,
    },

    /// Add a related entity to a relationship field
    Link {
        element: String,
        field: String,
        target: String,
    },

    /// Remove a related entity from a relationship field
    Unlink {
        element: String,
        field: String,
        target: String,
    },

    /// List instances of a type
    Find {
        type_name: String,

        /// Maximum number of instances to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Count instances of a type
    Count { type_name: String },

    /// Exact lookup on an indexed field
    Lookup {
        type_name: String,
        field: String,
        value: String,
    },

    /// Full-text search on an indexed field
    Search {
        type_name: String,
        field: String,
        query: String,
    },

    /// Remove an entity
    Remove { element: String },
}

// =============================================================================
// SESSION
// =============================================================================

/// The loaded configuration and the infrastructure built from it.
pub struct Session {
    pub config: AppConfig,
    pub infra: MappingInfrastructure,
}

impl Session {
    /// Load the configuration, open the store and validate the schema.
    pub fn open(config_path: &std::path::Path, database: Option<PathBuf>) -> Result<Self, AppError> {
        let mut config = AppConfig::load(config_path)?;
        if let Some(path) = database {
            config.store.path = path;
        }
        let registry = schema::registry(&config)?;
        let db = RedbGraph::open(&config.store.path)?;
        let infra = MappingInfrastructure::new(Arc::new(db), Arc::new(registry), config.mapping.clone());
        let types = infra.mapping_context().validate_all()?;
        debug!(
            store = %config.store.path.display(),
            types = types.len(),
            "session opened"
        );
        Ok(Self { config, infra })
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments, writing results to `out`.
pub fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), AppError> {
    let session = Session::open(&cli.config, cli.database)?;
    let json = cli.json;

    match cli.command {
        Commands::Types => cmd_types(&session, out, json),
        Commands::Create { type_name, set } => cmd_create(&session, out, json, &type_name, &set),
        Commands::Relate {
            type_name,
            start,
            end,
            set,
        } => cmd_relate(&session, out, json, &type_name, &start, &end, &set),
        Commands::Show { element } => cmd_show(&session, out, json, &element),
        Commands::Set {
            element,
            field,
            value,
        } => cmd_set(&session, out, json, &element, &field, &value),
        Commands::Link {
            element,
            field,
            target,
        } => cmd_link(&session, out, json, &element, &field, &target, LinkMode::Add),
        Commands::Unlink {
            element,
            field,
            target,
        } => cmd_link(&session, out, json, &element, &field, &target, LinkMode::Remove),
        Commands::Find { type_name, limit } => cmd_find(&session, out, json, &type_name, limit),
        Commands::Count { type_name } => cmd_count(&session, out, json, &type_name),
        Commands::Lookup {
            type_name,
            field,
            value,
        } => cmd_lookup(&session, out, json, &type_name, &field, &value),
        Commands::Search {
            type_name,
            field,
            query,
        } => cmd_search(&session, out, json, &type_name, &field, &query),
        Commands::Remove { element } => cmd_remove(&session, out, json, &element),
    }
}
