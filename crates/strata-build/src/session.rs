//! Session-scoped build state
//!
//! One [`BuildSession`] lives as long as an orchestration session: a single
//! CLI build, or every rebuild of a watch session. It is created explicitly
//! and handed to the orchestrator; nothing here is process-global.

use crate::build_info::BuildStateStore;
use crate::graph::ProjectGraph;
use crate::package_cache::PackageMetadataCache;
use crate::snapshot::VersionCache;
use std::collections::HashSet;
use std::path::PathBuf;

/// Caches and stores shared by every run of a session
#[derive(Debug, Default)]
pub struct BuildSession {
    pub store: BuildStateStore,
    pub packages: PackageMetadataCache,
    pub versions: VersionCache,
}

/// What a cache trim released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimStats {
    pub version_entries: usize,
}

impl BuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packages(mut self, packages: PackageMetadataCache) -> Self {
        self.packages = packages;
        self
    }

    /// Drop cached file versions for files no longer in `graph`
    pub fn trim(&mut self, graph: &ProjectGraph) -> TrimStats {
        let live: HashSet<PathBuf> = graph
            .projects()
            .iter()
            .flat_map(|p| p.root_files().iter().cloned())
            .collect();
        TrimStats {
            version_entries: self.versions.retain_paths(&live),
        }
    }
}

/// Resident memory of this process in bytes, where the platform reports it
pub fn resident_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
