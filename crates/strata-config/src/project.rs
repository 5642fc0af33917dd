//! Project Configuration (strata.json)
//!
//! Handles the per-project configuration stored in `strata.json`. A config may
//! `extends` another config and declares the projects it `references`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Project configuration from strata.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Config this one inherits options from (relative to this file)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Compiler options
    #[serde(default)]
    pub compiler_options: CompilerOptions,

    /// Explicit root files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,

    /// Directories searched recursively for source files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    /// Path prefixes removed from `include` results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,

    /// Referenced projects
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceConfig>,
}

/// Compiler options as written in a config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CompilerOptions {
    /// Output directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,

    /// Root of the source tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,

    /// Suppress outputs and build info when any error is reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_emit_on_error: Option<bool>,

    /// Emit declaration files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declaration: Option<bool>,

    /// Strict checking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,

    /// Explicit build-info location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_info_file: Option<String>,
}

/// A project reference entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReferenceConfig {
    /// Path to the referenced config file or its directory
    pub path: String,

    /// Prepend the referenced project's output to this project's output
    #[serde(default)]
    pub prepend: bool,
}

/// Compiler options after `extends` merging, with paths made absolute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResolvedOptions {
    pub out_dir: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub no_emit_on_error: bool,
    pub declaration: bool,
    pub strict: bool,
    pub build_info_file: Option<PathBuf>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_json_str(&content, path)
    }

    /// Parse project configuration from JSON text read from `path`
    pub fn from_json_str(content: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::JsonParseError {
                file: path.to_path_buf(),
                error: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(extends) = &self.extends {
            if extends.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "extends".to_string(),
                    reason: "path cannot be empty".to_string(),
                });
            }
        }

        for (index, reference) in self.references.iter().enumerate() {
            if reference.path.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("references[{}].path", index),
                    reason: "path cannot be empty".to_string(),
                });
            }
        }

        if let Some(files) = &self.files {
            if files.iter().any(|f| f.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "files".to_string(),
                    reason: "entries cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl CompilerOptions {
    /// Resolve these options against the directory of the file that declared them.
    ///
    /// `base` holds the already-resolved options of the extended config; any
    /// option this config leaves unset is inherited from it.
    pub fn resolve(&self, config_dir: &Path, base: &ResolvedOptions) -> ResolvedOptions {
        let path = |value: &Option<String>, inherited: &Option<PathBuf>| match value {
            Some(v) => Some(config_dir.join(v)),
            None => inherited.clone(),
        };

        ResolvedOptions {
            out_dir: path(&self.out_dir, &base.out_dir),
            root_dir: path(&self.root_dir, &base.root_dir),
            no_emit_on_error: self.no_emit_on_error.unwrap_or(base.no_emit_on_error),
            declaration: self.declaration.unwrap_or(base.declaration),
            strict: self.strict.unwrap_or(base.strict),
            build_info_file: path(&self.build_info_file, &base.build_info_file),
        }
    }
}

impl ResolvedOptions {
    /// Stable digest of the effective options
    ///
    /// Any change to an option that affects compiler output changes the digest.
    pub fn digest(&self) -> String {
        // serde_json keeps struct field order, so the encoding is canonical
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }
}
