//! Persisted per-project build state
//!
//! A build-info file is the only state that survives between runs. It is
//! written with a temp-file-and-rename so a crash mid-write never leaves a torn
//! file, and it is only written after a successful build. Anything that cannot
//! be read back (bad JSON, wrong format tag, missing field, incomplete marker)
//! is reported as [`LoadedBuildInfo::Corrupt`], which callers treat exactly like
//! [`LoadedBuildInfo::Absent`].

use crate::error::{BuildError, BuildResult};
use crate::frontend::Diagnostic;
use crate::graph::Project;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Format tag written into every build-info file
pub const BUILD_INFO_VERSION: &str = "strata-buildinfo/1";

/// State recorded after a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Format tag, must equal [`BUILD_INFO_VERSION`]
    pub version: String,
    /// Digest of the compiler options used
    pub options_digest: String,
    /// Root file → content version
    pub files: BTreeMap<PathBuf, String>,
    /// Root file → declaration signature
    pub file_signatures: BTreeMap<PathBuf, String>,
    /// Public-surface signature of the whole project
    pub signature: String,
    /// Referenced project config → its signature when this build ran
    pub dependency_signatures: BTreeMap<PathBuf, String>,
    /// Non-error diagnostics of the build, replayed while up to date
    pub diagnostics: Vec<Diagnostic>,
    /// Files written by the emitter
    pub emitted: Vec<PathBuf>,
    /// Completion marker
    pub complete: bool,
}

/// Outcome of reading a build-info file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedBuildInfo {
    Present(BuildInfo),
    Absent,
    Corrupt { reason: String },
}

impl LoadedBuildInfo {
    /// The build info, if it can be trusted
    pub fn usable(&self) -> Option<&BuildInfo> {
        match self {
            Self::Present(info) => Some(info),
            Self::Absent | Self::Corrupt { .. } => None,
        }
    }

    pub fn into_usable(self) -> Option<BuildInfo> {
        match self {
            Self::Present(info) => Some(info),
            Self::Absent | Self::Corrupt { .. } => None,
        }
    }
}

/// Reads and atomically writes build-info files
#[derive(Debug, Default)]
pub struct BuildStateStore {
    writes: usize,
}

impl BuildStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves since the store was created
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Load the build info of `project`
    pub fn load(&self, project: &Project) -> LoadedBuildInfo {
        load_from(project.build_info_path())
    }

    /// Atomically replace the build info of `project`
    ///
    /// On failure the previous file, if any, is left untouched.
    pub fn save(&mut self, project: &Project, info: &BuildInfo) -> BuildResult<()> {
        let path = project.build_info_path();
        let encoded = serde_json::to_vec_pretty(info).map_err(|e| BuildError::BuildInfoWrite {
            path: path.to_path_buf(),
            error: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        write_atomic(path, &encoded).map_err(|error| BuildError::BuildInfoWrite {
            path: path.to_path_buf(),
            error,
        })?;

        self.writes += 1;
        debug!(project = %project.config_path().display(), path = %path.display(), "saved build info");
        Ok(())
    }

    /// Delete the build info of `project`; returns whether a file existed
    pub fn remove(&mut self, project: &Project) -> BuildResult<bool> {
        let path = project.build_info_path();
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BuildError::io(path, e)),
        }
    }
}

/// Read a build-info file; never fails
pub fn load_from(path: &Path) -> LoadedBuildInfo {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadedBuildInfo::Absent,
        Err(e) => return corrupt(path, format!("unreadable: {}", e)),
    };

    let info: BuildInfo = match serde_json::from_slice(&content) {
        Ok(info) => info,
        Err(e) => return corrupt(path, format!("malformed: {}", e)),
    };

    if info.version != BUILD_INFO_VERSION {
        return corrupt(
            path,
            format!(
                "format '{}' does not match '{}'",
                info.version, BUILD_INFO_VERSION
            ),
        );
    }

    if !info.complete {
        return corrupt(path, "missing completion marker".to_string());
    }

    LoadedBuildInfo::Present(info)
}

fn corrupt(path: &Path, reason: String) -> LoadedBuildInfo {
    warn!(path = %path.display(), %reason, "ignoring corrupt build info");
    LoadedBuildInfo::Corrupt { reason }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> std::io::Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        e
    })
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "buildinfo".to_string());
    path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()))
}
