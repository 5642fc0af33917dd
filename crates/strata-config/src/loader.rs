//! Configuration Loader
//!
//! Resolves `strata.json` files into [`ResolvedConfig`]s:
//! 1. The `extends` chain is followed and merged (child overrides parent)
//! 2. Path-valued options are made absolute relative to the declaring file
//! 3. Root files are collected from `files` / `include` / `exclude`
//! 4. `references` are resolved to canonical config paths
//!
//! [`ConfigLoader::load_closure`] loads a set of roots plus everything they
//! transitively reference. A config that fails to load is reported as a
//! [`ConfigFailure`] and does not stop its siblings from loading.

use crate::project::{ProjectConfig, ResolvedOptions};
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME, SOURCE_EXTENSION};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A fully resolved project configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Canonical path of the config file
    pub config_path: PathBuf,
    /// Effective compiler options
    pub options: ResolvedOptions,
    /// Digest of `options`
    pub options_digest: String,
    /// Root source files, sorted
    pub root_files: Vec<PathBuf>,
    /// Referenced projects in declaration order
    pub references: Vec<ResolvedReference>,
    /// Where this project's build info lives
    pub build_info_path: PathBuf,
    /// Every config reached through `extends`
    pub extended_configs: Vec<PathBuf>,
}

/// A resolved project reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// Config path of the referenced project (canonical when it exists)
    pub path: PathBuf,
    /// Prepend the referenced project's output
    pub prepend: bool,
}

/// A config that could not be loaded
#[derive(Debug)]
pub struct ConfigFailure {
    pub path: PathBuf,
    pub error: ConfigError,
}

/// Result of loading a reference closure
#[derive(Debug, Default)]
pub struct LoadedClosure {
    /// Successfully loaded configs, roots first, then references as discovered
    pub configs: Vec<ResolvedConfig>,
    /// Configs that failed to load
    pub failures: Vec<ConfigFailure>,
}

impl ResolvedConfig {
    /// Directory containing the config file
    pub fn project_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or(Path::new("."))
    }

    /// Human-readable project name (the config's directory name)
    pub fn name(&self) -> String {
        self.project_dir()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.config_path.display().to_string())
    }

    /// Output directory (defaults to the project directory)
    pub fn out_dir(&self) -> PathBuf {
        self.options
            .out_dir
            .clone()
            .unwrap_or_else(|| self.project_dir().to_path_buf())
    }

    /// Whether `path` is one of this project's inputs or configs
    pub fn owns_file(&self, path: &Path) -> bool {
        path == self.config_path
            || self.root_files.iter().any(|f| f == path)
            || self.extended_configs.iter().any(|f| f == path)
    }
}

/// Inputs inherited through `extends`, already absolute
#[derive(Debug, Default, Clone)]
struct InputSpec {
    files: Option<Vec<PathBuf>>,
    include: Option<Vec<PathBuf>>,
    exclude: Option<Vec<PathBuf>>,
}

#[derive(Debug, Default)]
struct Merged {
    options: ResolvedOptions,
    inputs: InputSpec,
    extended: Vec<PathBuf>,
}

/// Configuration loader
///
/// Parsed files are cached by canonical path so configs shared through
/// `extends` are read once per loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    parsed: HashMap<PathBuf, ProjectConfig>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            parsed: HashMap::new(),
        }
    }

    /// Map a user-supplied path (file or directory) to an existing config file
    pub fn resolve_config_path(path: &Path) -> ConfigResult<PathBuf> {
        let candidate = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        candidate
            .canonicalize()
            .map_err(|e| ConfigError::io(&candidate, e))
    }

    /// Forget a cached config so the next load re-reads it
    pub fn invalidate(&mut self, path: &Path) {
        self.parsed.remove(path);
    }

    /// Forget every cached config
    pub fn clear(&mut self) {
        self.parsed.clear();
    }

    /// Load and resolve a single project config
    pub fn load_project(&mut self, path: &Path) -> ConfigResult<ResolvedConfig> {
        let config_path = Self::resolve_config_path(path)?;
        let merged = self.merge_chain(&config_path, &mut Vec::new())?;
        let config = self.parse(&config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let references = config
            .references
            .iter()
            .map(|r| ResolvedReference {
                path: reference_config_path(&config_dir, &r.path),
                prepend: r.prepend,
            })
            .collect();

        let root_files = collect_root_files(&config_path, &merged)?;
        let build_info_path = build_info_path(&config_path, &merged.options);
        let options_digest = merged.options.digest();

        debug!(
            config = %config_path.display(),
            files = root_files.len(),
            "resolved project config"
        );

        Ok(ResolvedConfig {
            config_path,
            options: merged.options,
            options_digest,
            root_files,
            references,
            build_info_path,
            extended_configs: merged.extended,
        })
    }

    /// Load the given roots and every project they transitively reference
    pub fn load_closure(&mut self, roots: &[PathBuf]) -> LoadedClosure {
        let mut closure = LoadedClosure::default();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        for root in roots {
            match Self::resolve_config_path(root) {
                Ok(path) => queue.push_back(path),
                Err(error) => {
                    warn!(path = %root.display(), %error, "failed to locate project config");
                    closure.failures.push(ConfigFailure {
                        path: root.clone(),
                        error,
                    });
                }
            }
        }

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }

            match self.load_project(&path) {
                Ok(config) => {
                    for reference in &config.references {
                        if !seen.contains(&reference.path) {
                            queue.push_back(reference.path.clone());
                        }
                    }
                    closure.configs.push(config);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to load project config");
                    closure.failures.push(ConfigFailure { path, error });
                }
            }
        }

        closure
    }

    fn parse(&mut self, path: &Path) -> ConfigResult<ProjectConfig> {
        if let Some(config) = self.parsed.get(path) {
            return Ok(config.clone());
        }
        let config = ProjectConfig::load_from_file(path)?;
        self.parsed.insert(path.to_path_buf(), config.clone());
        Ok(config)
    }

    /// Follow the `extends` chain of `path`, merging on the way back down
    fn merge_chain(&mut self, path: &Path, chain: &mut Vec<PathBuf>) -> ConfigResult<Merged> {
        if chain.iter().any(|p| p == path) {
            let mut cycle: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
            cycle.push(path.display().to_string());
            return Err(ConfigError::CircularExtends(cycle.join(" -> ")));
        }
        chain.push(path.to_path_buf());

        let config = self.parse(path)?;
        let config_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut base = match &config.extends {
            Some(target) => {
                let target_path = config_dir.join(target);
                let target_path = if target_path.is_dir() {
                    target_path.join(CONFIG_FILE_NAME)
                } else {
                    target_path
                };
                let canonical =
                    target_path
                        .canonicalize()
                        .map_err(|_| ConfigError::ExtendsNotFound {
                            file: path.to_path_buf(),
                            target: target.clone(),
                        })?;
                let mut merged = self.merge_chain(&canonical, chain)?;
                merged.extended.insert(0, canonical);
                merged
            }
            None => Merged::default(),
        };

        chain.pop();

        let absolute = |entries: &Option<Vec<String>>, inherited: &Option<Vec<PathBuf>>| {
            match entries {
                Some(list) => Some(list.iter().map(|e| config_dir.join(e)).collect()),
                None => inherited.clone(),
            }
        };

        Ok(Merged {
            options: config.compiler_options.resolve(&config_dir, &base.options),
            inputs: InputSpec {
                files: absolute(&config.files, &base.inputs.files),
                include: absolute(&config.include, &base.inputs.include),
                exclude: absolute(&config.exclude, &base.inputs.exclude),
            },
            extended: std::mem::take(&mut base.extended),
        })
    }
}

/// Config path named by a `references` entry, relative to `config_dir`
fn reference_config_path(config_dir: &Path, reference: &str) -> PathBuf {
    let target = config_dir.join(reference);
    let target = if target.is_dir() || target.extension().is_none() {
        target.join(CONFIG_FILE_NAME)
    } else {
        target
    };
    target.canonicalize().unwrap_or(target)
}

fn build_info_path(config_path: &Path, options: &ResolvedOptions) -> PathBuf {
    if let Some(explicit) = &options.build_info_file {
        return explicit.clone();
    }

    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "strata".to_string());
    let file_name = format!("{}.buildinfo", stem);

    match &options.out_dir {
        Some(out_dir) => out_dir.join(file_name),
        None => config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(file_name),
    }
}

/// Emitted `.d.st` files are never inputs
pub fn is_declaration_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".d.st"))
}

fn collect_root_files(config_path: &Path, merged: &Merged) -> ConfigResult<Vec<PathBuf>> {
    let config_dir = config_path.parent().unwrap_or(Path::new("."));
    let mut files = Vec::new();

    if let Some(explicit) = &merged.inputs.files {
        for file in explicit {
            let canonical = file.canonicalize().map_err(|_| ConfigError::MissingFile {
                file: file.clone(),
                config: config_path.to_path_buf(),
            })?;
            files.push(canonical);
        }
    }

    let include = match (&merged.inputs.files, &merged.inputs.include) {
        (_, Some(include)) => include.clone(),
        (None, None) => vec![config_dir.join("src")],
        (Some(_), None) => Vec::new(),
    };

    let mut exclude: Vec<PathBuf> = merged
        .inputs
        .exclude
        .iter()
        .flatten()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();
    if let Some(out_dir) = &merged.options.out_dir {
        exclude.push(out_dir.canonicalize().unwrap_or_else(|_| out_dir.clone()));
    }

    for dir in include {
        let Ok(dir) = dir.canonicalize() else {
            continue;
        };
        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|s| s.to_str()) != Some(SOURCE_EXTENSION)
            {
                continue;
            }
            if exclude.iter().any(|prefix| path.starts_with(prefix)) || is_declaration_output(path)
            {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(ConfigError::NoInputs(config_path.to_path_buf()));
    }
    Ok(files)
}
