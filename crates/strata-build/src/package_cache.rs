//! Directory-keyed cache of package manifests
//!
//! Module resolution asks "which package owns this directory?" many times per
//! build. The cache remembers, per directory, either the parsed manifest
//! (positive entry) or that no manifest exists there (negative entry). A
//! directory in neither map is unknown and is probed at most once per search.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a package manifest
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// The parts of a package manifest the build cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Entry declaration file, relative to the package directory
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Three-valued answer of [`PackageMetadataCache::directory_has_metadata`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ternary {
    True,
    False,
    Unknown,
}

/// Where manifests are read from
pub trait ManifestSource {
    /// Manifest text in `dir`, or `None` if there is none
    fn read_manifest(&self, dir: &Path) -> io::Result<Option<String>>;
}

/// Reads `package.json` from the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsManifestSource;

impl ManifestSource for FsManifestSource {
    fn read_manifest(&self, dir: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(dir.join(MANIFEST_FILE_NAME)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Absence {
    /// Probed and found nothing
    Confirmed,
    /// A manifest was deleted here; probe again before trusting this
    Provisional,
}

/// Session-scoped package manifest cache
pub struct PackageMetadataCache {
    source: Box<dyn ManifestSource>,
    present: HashMap<PathBuf, PackageMetadata>,
    absent: HashMap<PathBuf, Absence>,
    probes: usize,
}

impl Default for PackageMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PackageMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageMetadataCache")
            .field("present", &self.present.len())
            .field("absent", &self.absent.len())
            .field("probes", &self.probes)
            .finish()
    }
}

impl PackageMetadataCache {
    /// Cache backed by the file system
    pub fn new() -> Self {
        Self::with_source(FsManifestSource)
    }

    pub fn with_source(source: impl ManifestSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            present: HashMap::new(),
            absent: HashMap::new(),
            probes: 0,
        }
    }

    /// Number of manifest reads performed so far
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Number of directories with a known answer
    pub fn len(&self) -> usize {
        self.present.len() + self.absent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty() && self.absent.is_empty()
    }

    /// Re-read the manifest at `manifest_path` and record the result
    pub fn add_or_update(&mut self, manifest_path: &Path) {
        let Some(dir) = manifest_path.parent() else {
            return;
        };
        self.probe(dir);
    }

    /// Forget the manifest at `manifest_path`
    ///
    /// The directory becomes provisionally negative: the next search probes it
    /// again instead of trusting the absence.
    pub fn delete(&mut self, manifest_path: &Path) {
        let Some(dir) = manifest_path.parent() else {
            return;
        };
        self.present.remove(dir);
        self.absent.insert(dir.to_path_buf(), Absence::Provisional);
        debug!(dir = %dir.display(), "package manifest removed");
    }

    /// Cached manifest of `dir`; never touches the file system
    pub fn get_in_directory(&self, dir: &Path) -> Option<&PackageMetadata> {
        self.present.get(dir)
    }

    /// Whether `dir` is known to hold a manifest; never touches the file system
    pub fn directory_has_metadata(&self, dir: &Path) -> Ternary {
        if self.present.contains_key(dir) {
            return Ternary::True;
        }
        match self.absent.get(dir) {
            Some(Absence::Confirmed) => Ternary::False,
            Some(Absence::Provisional) | None => Ternary::Unknown,
        }
    }

    /// Classify `dir` and its ancestors up to the first known directory
    ///
    /// The walk stops at the first directory already classified `True` or
    /// `False`; every unknown directory before it is probed once and its
    /// answer recorded. Returns the directory that ended the walk when it
    /// holds a manifest.
    pub fn search_directory_and_ancestors(&mut self, dir: &Path) -> Option<PathBuf> {
        let mut current = Some(dir);
        while let Some(candidate) = current {
            let found = match self.directory_has_metadata(candidate) {
                Ternary::True => return Some(candidate.to_path_buf()),
                Ternary::False => return None,
                Ternary::Unknown => self.probe(candidate),
            };
            if found {
                return Some(candidate.to_path_buf());
            }
            current = candidate.parent();
        }
        None
    }

    /// Nearest directory at or above `dir` that holds a manifest
    ///
    /// Unlike [`Self::search_directory_and_ancestors`] this keeps climbing past
    /// known-absent directories; those are answered from the cache.
    pub fn nearest_package_dir(&mut self, dir: &Path) -> Option<PathBuf> {
        let mut current = Some(dir);
        while let Some(candidate) = current {
            if self.has_metadata(candidate) {
                return Some(candidate.to_path_buf());
            }
            current = candidate.parent();
        }
        None
    }

    /// Resolve a bare package specifier from a file in `from_dir`
    ///
    /// Looks for the package in `node_modules` of the nearest packages above
    /// `from_dir`, the way a dependency install lays them out.
    pub fn resolve_package(&mut self, from_dir: &Path, specifier: &str) -> Option<PathBuf> {
        let mut current = Some(from_dir.to_path_buf());
        while let Some(dir) = current {
            let owner = self.nearest_package_dir(&dir)?;
            let candidate = owner.join("node_modules").join(specifier);
            if self.has_metadata(&candidate) {
                return Some(candidate);
            }
            current = owner.parent().map(Path::to_path_buf);
        }
        None
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.present.clear();
        self.absent.clear();
    }

    /// Cached answer for `dir`, probing only when unknown
    fn has_metadata(&mut self, dir: &Path) -> bool {
        match self.directory_has_metadata(dir) {
            Ternary::True => true,
            Ternary::False => false,
            Ternary::Unknown => self.probe(dir),
        }
    }

    /// Read `dir`'s manifest once and record the answer
    fn probe(&mut self, dir: &Path) -> bool {
        self.probes += 1;
        let key = dir.to_path_buf();
        match self.source.read_manifest(dir) {
            Ok(Some(content)) => match serde_json::from_str::<PackageMetadata>(&content) {
                Ok(metadata) => {
                    self.absent.remove(&key);
                    self.present.insert(key, metadata);
                    true
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "ignoring malformed package manifest");
                    self.present.remove(&key);
                    self.absent.insert(key, Absence::Confirmed);
                    false
                }
            },
            Ok(None) => {
                self.present.remove(&key);
                self.absent.insert(key, Absence::Confirmed);
                false
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "package manifest unreadable");
                self.present.remove(&key);
                self.absent.insert(key, Absence::Provisional);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// In-memory manifests that log every probe
    #[derive(Clone, Default)]
    struct FakeSource {
        manifests: Rc<RefCell<HashMap<PathBuf, String>>>,
        probed: Rc<RefCell<Vec<PathBuf>>>,
    }

    impl FakeSource {
        fn with(self, dir: &str, manifest: &str) -> Self {
            self.manifests
                .borrow_mut()
                .insert(PathBuf::from(dir), manifest.to_string());
            self
        }

        fn probed(&self) -> Vec<PathBuf> {
            self.probed.borrow().clone()
        }
    }

    impl ManifestSource for FakeSource {
        fn read_manifest(&self, dir: &Path) -> io::Result<Option<String>> {
            self.probed.borrow_mut().push(dir.to_path_buf());
            Ok(self.manifests.borrow().get(dir).cloned())
        }
    }

    #[test]
    fn test_search_probes_each_ancestor_once() {
        let source = FakeSource::default().with("/repo", r#"{"name": "repo"}"#);
        let mut cache = PackageMetadataCache::with_source(source.clone());

        let found = cache.search_directory_and_ancestors(Path::new("/repo/pkg/src"));
        assert_eq!(found, Some(PathBuf::from("/repo")));
        assert_eq!(
            source.probed(),
            vec![
                PathBuf::from("/repo/pkg/src"),
                PathBuf::from("/repo/pkg"),
                PathBuf::from("/repo"),
            ]
        );

        // the start directory is now known absent, so the walk ends there
        let again = cache.search_directory_and_ancestors(Path::new("/repo/pkg/src"));
        assert_eq!(again, None);
        assert_eq!(source.probed().len(), 3);
        assert_eq!(cache.probes(), 3);
    }

    #[test]
    fn test_search_stops_at_classified_ancestor() {
        let source = FakeSource::default().with("/repo", r#"{"name": "repo"}"#);
        let mut cache = PackageMetadataCache::with_source(source.clone());
        cache.search_directory_and_ancestors(Path::new("/repo/pkg/src"));

        let found = cache.search_directory_and_ancestors(Path::new("/repo/pkg/lib"));
        assert_eq!(found, None);
        assert_eq!(source.probed().last(), Some(&PathBuf::from("/repo/pkg/lib")));
        assert_eq!(cache.probes(), 4);
        assert_eq!(cache.directory_has_metadata(Path::new("/repo/pkg/lib")), Ternary::False);
    }

    #[test]
    fn test_nearest_package_dir_climbs_past_known_absence() {
        let source = FakeSource::default().with("/repo", r#"{"name": "repo"}"#);
        let mut cache = PackageMetadataCache::with_source(source.clone());
        cache.search_directory_and_ancestors(Path::new("/repo/pkg/src"));

        assert_eq!(
            cache.nearest_package_dir(Path::new("/repo/pkg/src")),
            Some(PathBuf::from("/repo"))
        );
        assert_eq!(cache.probes(), 3);
    }

    #[test]
    fn test_search_without_manifest_reaches_root() {
        let source = FakeSource::default();
        let mut cache = PackageMetadataCache::with_source(source.clone());

        assert_eq!(cache.search_directory_and_ancestors(Path::new("/a/b")), None);
        assert_eq!(source.probed().len(), 3);
        assert_eq!(cache.directory_has_metadata(Path::new("/a")), Ternary::False);

        assert_eq!(cache.search_directory_and_ancestors(Path::new("/a/b")), None);
        assert_eq!(source.probed().len(), 3);
    }

    #[test]
    fn test_directory_has_metadata_is_ternary() {
        let source = FakeSource::default().with("/p", "{}");
        let mut cache = PackageMetadataCache::with_source(source);

        assert_eq!(cache.directory_has_metadata(Path::new("/p")), Ternary::Unknown);
        cache.add_or_update(Path::new("/p/package.json"));
        assert_eq!(cache.directory_has_metadata(Path::new("/p")), Ternary::True);
        assert_eq!(
            cache.get_in_directory(Path::new("/p")),
            Some(&PackageMetadata::default())
        );
    }

    #[test]
    fn test_delete_is_provisional() {
        let source = FakeSource::default().with("/p", r#"{"name": "p"}"#);
        let mut cache = PackageMetadataCache::with_source(source.clone());
        cache.add_or_update(Path::new("/p/package.json"));

        source.manifests.borrow_mut().clear();
        cache.delete(Path::new("/p/package.json"));
        assert_eq!(cache.get_in_directory(Path::new("/p")), None);
        assert_eq!(cache.directory_has_metadata(Path::new("/p")), Ternary::Unknown);

        // the manifest comes back before the next search
        source
            .manifests
            .borrow_mut()
            .insert(PathBuf::from("/p"), r#"{"name": "p2"}"#.to_string());
        let found = cache.search_directory_and_ancestors(Path::new("/p"));
        assert_eq!(found, Some(PathBuf::from("/p")));
        assert_eq!(
            cache.get_in_directory(Path::new("/p")).and_then(|m| m.name.as_deref()),
            Some("p2")
        );
    }

    #[test]
    fn test_malformed_manifest_is_absent() {
        let source = FakeSource::default().with("/p", "{ not json");
        let mut cache = PackageMetadataCache::with_source(source);
        cache.add_or_update(Path::new("/p/package.json"));
        assert_eq!(cache.directory_has_metadata(Path::new("/p")), Ternary::False);
    }

    #[test]
    fn test_resolve_package_in_node_modules() {
        let source = FakeSource::default()
            .with("/ws", r#"{"name": "ws", "dependencies": {"geo": "^1.0.0"}}"#)
            .with("/ws/node_modules/geo", r#"{"name": "geo", "version": "1.2.0"}"#);
        let mut cache = PackageMetadataCache::with_source(source);

        assert_eq!(
            cache.resolve_package(Path::new("/ws/app/src"), "geo"),
            Some(PathBuf::from("/ws/node_modules/geo"))
        );
        assert_eq!(cache.resolve_package(Path::new("/ws/app/src"), "missing"), None);
    }

    #[test]
    fn test_fs_source_reads_package_json() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(MANIFEST_FILE_NAME),
            r#"{"name": "on-disk", "version": "0.1.0"}"#,
        )
        .unwrap();
        let nested = temp.path().join("src");
        fs::create_dir(&nested).unwrap();

        let mut cache = PackageMetadataCache::new();
        let found = cache.search_directory_and_ancestors(&nested);
        assert_eq!(found.as_deref(), Some(temp.path()));
        let metadata = cache.get_in_directory(temp.path()).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("on-disk"));
        assert_eq!(metadata.version.as_deref(), Some("0.1.0"));
    }
}
