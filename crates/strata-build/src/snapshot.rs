//! File version snapshots for staleness checks

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One source file's version at snapshot time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// SHA-256 of the content; `None` if the file could not be read
    pub version: Option<String>,
}

/// Versions of a project's root files, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    records: Vec<FileRecord>,
}

/// Cached file state (timestamp, size) → content hash
#[derive(Debug, Clone)]
struct FileState {
    timestamp: SystemTime,
    size: u64,
    hash: String,
}

/// Session-scoped cache that avoids re-hashing files whose timestamp and size
/// have not changed since they were last hashed
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: HashMap<PathBuf, FileState>,
}

impl FileSnapshot {
    /// Hash every file in `files`, consulting and refreshing `cache`
    pub fn capture(files: &[PathBuf], cache: &mut VersionCache) -> Self {
        let entries = &cache.entries;
        let states: Vec<(PathBuf, Option<FileState>)> = files
            .par_iter()
            .map(|path| (path.clone(), read_state(path, entries.get(path))))
            .collect();

        let mut records = Vec::with_capacity(states.len());
        for (path, state) in states {
            let version = state.as_ref().map(|s| s.hash.clone());
            match state {
                Some(state) => {
                    cache.entries.insert(path.clone(), state);
                }
                None => {
                    cache.entries.remove(&path);
                }
            }
            records.push(FileRecord { path, version });
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|a, b| a.path == b.path);
        Self { records }
    }

    /// Build a snapshot from explicit records
    pub fn from_records(mut records: Vec<FileRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Self { records }
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Version of `path`, if it is in the snapshot and readable
    pub fn version_of(&self, path: &Path) -> Option<&str> {
        self.records
            .binary_search_by(|r| r.path.as_path().cmp(path))
            .ok()
            .and_then(|i| self.records[i].version.as_deref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget a single file so it is re-hashed next time
    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    /// Drop entries for files not in `keep`; returns how many were dropped
    pub fn retain_paths(&mut self, keep: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep.contains(path));
        self.entries.shrink_to_fit();
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// SHA-256 of `bytes` as lowercase hex
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn read_state(path: &Path, previous: Option<&FileState>) -> Option<FileState> {
    let metadata = fs::metadata(path).ok()?;
    let timestamp = metadata.modified().ok()?;
    let size = metadata.len();

    // Quick check: timestamp and size unchanged means content unchanged
    if let Some(previous) = previous {
        if previous.timestamp == timestamp && previous.size == size {
            return Some(previous.clone());
        }
    }

    let content = fs::read(path).ok()?;
    Some(FileState {
        timestamp,
        size,
        hash: hash_bytes(&content),
    })
}
