//! Session Configuration (~/.strata/config.toml)
//!
//! User-level settings for build and watch sessions.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default debounce delay for watch-mode rebuilds
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Default idle delay before session caches are reclaimed
pub const DEFAULT_RECLAIM_DELAY_MS: u64 = 5000;

/// Session configuration from ~/.strata/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Build settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSettings>,

    /// Watch settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchSettings>,
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSettings {
    /// Stop the run after the first failed project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
}

/// Watch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct WatchSettings {
    /// Quiet period after the last file event before rebuilding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,

    /// Idle period after a rebuild before caches are reclaimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaim_delay_ms: Option<u64>,
}

impl SessionConfig {
    /// Load session configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load the user's session config, falling back to defaults when absent,
    /// then apply STRATA_* environment overrides
    pub fn load() -> ConfigResult<Self> {
        let path = Self::session_config_path()?;
        let config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Get the session config file path (~/.strata/config.toml)
    pub fn session_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".strata").join("config.toml"))
    }

    /// Validate the session configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(watch) = &self.watch {
            if watch.debounce_ms == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "watch.debounce_ms".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported: STRATA_FAIL_FAST, STRATA_DEBOUNCE_MS
    pub fn with_env_overrides(mut self) -> ConfigResult<Self> {
        if let Ok(value) = env::var("STRATA_FAIL_FAST") {
            let fail_fast = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
            self.build.get_or_insert_with(Default::default).fail_fast = Some(fail_fast);
        }

        if let Ok(value) = env::var("STRATA_DEBOUNCE_MS") {
            let ms = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: "STRATA_DEBOUNCE_MS".to_string(),
                reason: format!("'{}' is not a number of milliseconds", value),
            })?;
            self.watch.get_or_insert_with(Default::default).debounce_ms = Some(ms);
        }

        self.validate()?;
        Ok(self)
    }

    /// Whether runs stop after the first failed project
    pub fn fail_fast(&self) -> bool {
        self.build
            .as_ref()
            .and_then(|b| b.fail_fast)
            .unwrap_or(false)
    }

    /// Watch-mode debounce delay
    pub fn debounce(&self) -> Duration {
        let ms = self
            .watch
            .as_ref()
            .and_then(|w| w.debounce_ms)
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        Duration::from_millis(ms)
    }

    /// Idle delay before reclamation
    pub fn reclaim_delay(&self) -> Duration {
        let ms = self
            .watch
            .as_ref()
            .and_then(|w| w.reclaim_delay_ms)
            .unwrap_or(DEFAULT_RECLAIM_DELAY_MS);
        Duration::from_millis(ms)
    }
}
