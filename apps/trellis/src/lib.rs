//! # Trellis
//!
//! Command line application over the trellis-core mapping engine.
//!
//! - [`config`]: the `trellis.toml` file
//! - [`schema`]: runtime type registry built from the configuration
//! - [`cli`]: argument parsing and command implementations

pub mod cli;
pub mod config;
pub mod error;
pub mod schema;

pub use error::AppError;
