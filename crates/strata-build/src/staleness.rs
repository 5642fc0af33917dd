//! Decide whether a project must be rebuilt
//!
//! Classification never reads source files itself: it compares the stored
//! [`BuildInfo`] with a [`FileSnapshot`] taken by the caller and with the
//! status and signature each dependency reached earlier in the same run.

use crate::build_info::{BuildInfo, LoadedBuildInfo};
use crate::graph::Project;
use crate::snapshot::FileSnapshot;
use crate::status::{BuildStatus, StaleReason};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What a referenced project produced earlier in this run
#[derive(Debug, Clone, Copy)]
pub struct DependencyResult<'a> {
    pub config_path: &'a Path,
    pub status: &'a BuildStatus,
    /// Current public-surface signature, if the dependency has one
    pub signature: Option<&'a str>,
}

/// Classifies projects as up to date, stale or blocked
#[derive(Debug, Clone, Copy, Default)]
pub struct StalenessAnalyzer {
    force: bool,
}

impl StalenessAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer that reports every buildable project as stale
    pub fn forced() -> Self {
        Self { force: true }
    }

    /// Classify `project`
    ///
    /// Returns `UpToDate`, `NeedsBuild` or `Blocked`. Checks run in a fixed
    /// order and the first one that fires decides the reason, so own edits
    /// always win over dependency changes.
    pub fn classify(
        &self,
        project: &Project,
        build_info: &LoadedBuildInfo,
        snapshot: &FileSnapshot,
        dependencies: &[DependencyResult<'_>],
    ) -> BuildStatus {
        // A dependency with nothing usable on disk cannot be built against
        if let Some(blocked) = dependencies.iter().find(|d| has_no_output(d)) {
            return BuildStatus::Blocked {
                by: blocked.config_path.to_path_buf(),
            };
        }

        if self.force {
            return stale(StaleReason::Forced);
        }

        let info = match build_info {
            LoadedBuildInfo::Present(info) => info,
            LoadedBuildInfo::Absent => return stale(StaleReason::Unbuilt),
            LoadedBuildInfo::Corrupt { reason } => {
                return stale(StaleReason::Corrupt {
                    reason: reason.clone(),
                })
            }
        };

        if info.options_digest != project.options_digest() {
            return stale(StaleReason::OptionsChanged);
        }

        if let Some(path) = first_changed_file(info, snapshot) {
            return stale(StaleReason::OwnFilesChanged { path });
        }

        let recorded: BTreeSet<&Path> = info
            .dependency_signatures
            .keys()
            .map(PathBuf::as_path)
            .collect();
        let current: BTreeSet<&Path> = dependencies.iter().map(|d| d.config_path).collect();
        if recorded != current {
            return stale(StaleReason::ReferencesChanged);
        }

        for dependency in dependencies {
            // In a dry run a pending dependency has no signature yet
            let Some(signature) = dependency.signature else {
                continue;
            };
            let unchanged = info
                .dependency_signatures
                .get(dependency.config_path)
                .is_some_and(|recorded| recorded == signature);
            if !unchanged {
                return stale(StaleReason::DependencySurfaceChanged {
                    dependency: dependency.config_path.to_path_buf(),
                });
            }
        }

        BuildStatus::UpToDate
    }
}

fn stale(reason: StaleReason) -> BuildStatus {
    BuildStatus::NeedsBuild { reason }
}

/// Failed or never built, with no build info left behind
fn has_no_output(dependency: &DependencyResult<'_>) -> bool {
    dependency.signature.is_none()
        && (dependency.status.is_failure() || matches!(dependency.status, BuildStatus::Unbuilt))
}

/// Smallest path that was added, removed or edited since `info` was written
fn first_changed_file(info: &BuildInfo, snapshot: &FileSnapshot) -> Option<PathBuf> {
    let edited_or_added = snapshot
        .records()
        .iter()
        .find(|record| match (&record.version, info.files.get(&record.path)) {
            (Some(current), Some(previous)) => current != previous,
            _ => true,
        })
        .map(|record| record.path.clone());

    let removed = info
        .files
        .keys()
        .find(|path| !snapshot.records().iter().any(|r| &r.path == *path))
        .cloned();

    match (edited_or_added, removed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
