//! Configuration for qrelay.
//!
//! TOML files layered field by field:
//! - user config (`<config dir>/config.toml`)
//! - project-local `./qrelay.toml`, or one explicit file instead
//! - `QRELAY_*` environment variables
//!
//! CLI flags are applied by the binary on top of the result.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, xdg_config_dir,
    xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
