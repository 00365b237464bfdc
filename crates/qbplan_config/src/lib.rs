//! Parsing and validation of `qbplan.toml` floorplanner configuration.
//!
//! Every tunable the annealer, the cost evaluator, the move selector, and the
//! quad-tree partitioner read lives in a [`FloorplanConfig`] that is passed
//! to the driver at construction. All sections are optional and default to
//! the values documented on each field.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, validate_config, CONFIG_FILE_NAME};
pub use types::*;
