//! Parsing and validation of `tessera.toml` cache configuration files.
//!
//! This crate reads the optional configuration file and produces a
//! strongly-typed [`TesseraConfig`]. Every field has a default, so a missing
//! section (or a missing file, via [`load_config_or_default`]) is valid.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_config_or_default, CONFIG_FILE_NAME};
pub use types::*;
