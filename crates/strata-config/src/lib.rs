//! Strata Configuration System
//!
//! Provides configuration management for Strata builds including:
//! - Project configuration (strata.json) with `extends` chains
//! - Project reference closures (`references`)
//! - Session configuration (~/.strata/config.toml)
//! - Environment overrides (STRATA_*)
//!
//! # Configuration Hierarchy
//!
//! Session settings are loaded and merged in the following order (later overrides earlier):
//! 1. Session config (~/.strata/config.toml)
//! 2. Environment variables (STRATA_*)
//! 3. CLI flags
//!
//! Project configs are independent of that hierarchy: each `strata.json` is
//! merged with the configs it `extends`, then resolved into a [`ResolvedConfig`].
//!
//! # Example
//!
//! ```no_run
//! use strata_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let closure = loader.load_closure(&[Path::new(".").to_path_buf()]);
//! for config in &closure.configs {
//!     println!("{}", config.config_path.display());
//! }
//! ```

pub mod loader;
pub mod project;
pub mod session;

use std::path::PathBuf;
use thiserror::Error;

/// Default project config file name
pub const CONFIG_FILE_NAME: &str = "strata.json";

/// Source file extension picked up by `include` directories
pub const SOURCE_EXTENSION: &str = "st";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Invalid JSON in {file}: {error}")]
    JsonParseError {
        file: PathBuf,
        error: serde_json::Error,
    },

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Config {file} extends '{target}', which does not exist")]
    ExtendsNotFound { file: PathBuf, target: String },

    #[error("Circular extends chain: {0}")]
    CircularExtends(String),

    #[error("File '{file}' listed in {config} does not exist")]
    MissingFile { file: PathBuf, config: PathBuf },

    #[error("No inputs were found in config file {0}")]
    NoInputs(PathBuf),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

impl ConfigError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{
    is_declaration_output, ConfigFailure, ConfigLoader, LoadedClosure, ResolvedConfig,
    ResolvedReference,
};
pub use project::{CompilerOptions, ProjectConfig, ReferenceConfig, ResolvedOptions};
pub use session::SessionConfig;
