//! Build orchestration across a project graph
//!
//! The orchestrator walks the build order, classifies each project, runs the
//! front end and emitter on stale ones and persists build info for the ones
//! that succeed. A project only ever starts after every project it references
//! has reached a terminal status in the same run, so a dependent always sees
//! its dependencies' fresh signatures.
//!
//! Per-project failures are values in the report, never errors: a broken
//! project blocks its dependents and leaves independent subgraphs alone.

use crate::build_info::{BuildInfo, LoadedBuildInfo, BUILD_INFO_VERSION};
use crate::error::{BuildError, BuildResult};
use crate::frontend::{CancellationToken, CheckContext, Diagnostic, Emitter, FrontEnd, Program};
use crate::graph::{Project, ProjectGraph, ProjectId};
use crate::session::BuildSession;
use crate::snapshot::FileSnapshot;
use crate::staleness::{DependencyResult, StalenessAnalyzer};
use crate::status::{BuildStatus, FailureReason};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Run policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Stop after the first failed project
    pub fail_fast: bool,
    /// Rebuild every project regardless of build info
    pub force: bool,
    /// Classify only; never invoke the front end
    pub dry_run: bool,
}

/// Final state of one project in a run
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub config_path: PathBuf,
    pub name: String,
    pub status: BuildStatus,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats {
    pub total: usize,
    pub built: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Unbuilt or, in a dry run, pending
    pub skipped: usize,
    pub front_end_invocations: usize,
    pub build_info_writes: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

/// Result of one orchestration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// One entry per project, in build order
    pub outcomes: Vec<ProjectOutcome>,
    pub stats: BuildStats,
}

impl BuildReport {
    /// 0 if every project succeeded or was up to date, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.outcomes.iter().all(|o| o.status.is_success()) {
            0
        } else {
            1
        }
    }

    /// Whether any project failed or was blocked
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status.is_failure())
    }

    pub fn outcome(&self, config_path: &Path) -> Option<&ProjectOutcome> {
        self.outcomes.iter().find(|o| o.config_path == config_path)
    }

    /// Status of the project named `name`
    pub fn status_of(&self, name: &str) -> Option<&BuildStatus> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.status)
    }

    fn finish(&mut self, started: Instant) {
        let mut stats = BuildStats {
            total: self.outcomes.len(),
            front_end_invocations: self.stats.front_end_invocations,
            build_info_writes: self.stats.build_info_writes,
            elapsed: started.elapsed(),
            ..BuildStats::default()
        };
        for outcome in &self.outcomes {
            match outcome.status {
                BuildStatus::Succeeded | BuildStatus::SucceededSurfaceChanged => stats.built += 1,
                BuildStatus::UpToDate => stats.up_to_date += 1,
                BuildStatus::Failed { .. } => stats.failed += 1,
                BuildStatus::Blocked { .. } => stats.blocked += 1,
                BuildStatus::Unbuilt | BuildStatus::NeedsBuild { .. } | BuildStatus::Building => {
                    stats.skipped += 1
                }
            }
        }
        self.stats = stats;
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Status and signature a project reached in the current run
#[derive(Debug, Clone)]
struct RunResult {
    status: BuildStatus,
    signature: Option<String>,
}

/// What building one project produced
struct Built {
    status: BuildStatus,
    signature: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

/// Drives front end, emitter and build-state store over a graph
pub struct BuildOrchestrator<F, E> {
    front_end: F,
    emitter: E,
    options: BuildOptions,
    cancel: CancellationToken,
    session: BuildSession,
}

impl<F, E> BuildOrchestrator<F, E>
where
    F: FrontEnd,
    E: Emitter<F::Program>,
{
    /// Create an orchestrator with a fresh session
    pub fn new(front_end: F, emitter: E) -> Self {
        Self {
            front_end,
            emitter,
            options: BuildOptions::default(),
            cancel: CancellationToken::new(),
            session: BuildSession::new(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an existing session (and its caches)
    pub fn with_session(mut self, session: BuildSession) -> Self {
        self.session = session;
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn set_options(&mut self, options: BuildOptions) {
        self.options = options;
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn session(&self) -> &BuildSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut BuildSession {
        &mut self.session
    }

    /// Build every project of `graph`
    ///
    /// Configs that failed to load are reported first as `Failed`.
    pub fn run(&mut self, graph: &ProjectGraph) -> BuildReport {
        let started = Instant::now();
        let mut report = BuildReport::default();

        for invalid in graph.invalid() {
            warn!(project = %invalid.path.display(), error = %invalid.error, "invalid project config");
            report.outcomes.push(ProjectOutcome {
                config_path: invalid.path.clone(),
                name: display_name(&invalid.path),
                status: BuildStatus::Failed {
                    reason: FailureReason::Config {
                        message: invalid.error.clone(),
                    },
                },
                diagnostics: Vec::new(),
                elapsed: Duration::ZERO,
            });
        }

        self.walk(graph, graph.order(), &mut report);
        report.finish(started);
        report
    }

    /// Build only `ids` (in build order); other projects are read from disk
    pub fn run_subset(&mut self, graph: &ProjectGraph, ids: &[ProjectId]) -> BuildReport {
        let started = Instant::now();
        let wanted: HashSet<ProjectId> = ids.iter().copied().collect();
        let order: Vec<ProjectId> = graph
            .order()
            .iter()
            .copied()
            .filter(|id| wanted.contains(id))
            .collect();

        let mut report = BuildReport::default();
        self.walk(graph, &order, &mut report);
        report.finish(started);
        report
    }

    /// Build the projects at `config_paths` and everything they reference
    pub fn run_roots(
        &mut self,
        graph: &ProjectGraph,
        config_paths: &[PathBuf],
    ) -> BuildResult<BuildReport> {
        let roots = resolve_ids(graph, config_paths)?;
        let closure = graph.closure(&roots);
        Ok(self.run_subset(graph, &closure))
    }

    /// Delete outputs and build info of `roots` and everything they reference
    ///
    /// Returns every file removed. Never invokes the front end.
    pub fn clean(&mut self, graph: &ProjectGraph, roots: &[ProjectId]) -> BuildResult<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for id in graph.closure(roots) {
            let project = graph.project(id);
            if let LoadedBuildInfo::Present(info) = self.session.store.load(project) {
                for output in &info.emitted {
                    match fs::remove_file(output) {
                        Ok(()) => removed.push(output.clone()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(BuildError::io(output, e)),
                    }
                }
            }
            if self.session.store.remove(project)? {
                removed.push(project.build_info_path().to_path_buf());
            }
            info!(project = %project.name(), "cleaned");
        }

        Ok(removed)
    }

    fn walk(&mut self, graph: &ProjectGraph, order: &[ProjectId], report: &mut BuildReport) {
        let analyzer = if self.options.force {
            StalenessAnalyzer::forced()
        } else {
            StalenessAnalyzer::new()
        };
        let writes_before = self.session.store.writes();
        let mut results: HashMap<ProjectId, RunResult> = HashMap::new();
        let mut halted = false;

        for &id in order {
            let project = graph.project(id);
            let started = Instant::now();

            if halted || self.cancel.is_cancelled() {
                halted = true;
                report.outcomes.push(outcome(project, BuildStatus::Unbuilt, Vec::new(), started));
                continue;
            }

            let (status, signature, diagnostics) =
                self.process(graph, project, &analyzer, &results, report);

            info!(project = %project.name(), status = %status, "project finished");
            let cancelled = matches!(
                status,
                BuildStatus::Failed {
                    reason: FailureReason::Cancelled
                }
            );
            if cancelled || (self.options.fail_fast && matches!(status, BuildStatus::Failed { .. })) {
                halted = true;
            }

            results.insert(
                id,
                RunResult {
                    status: status.clone(),
                    signature,
                },
            );
            report.outcomes.push(outcome(project, status, diagnostics, started));
        }

        report.stats.build_info_writes += self.session.store.writes() - writes_before;
    }

    /// Classify one project and build it if needed
    fn process(
        &mut self,
        graph: &ProjectGraph,
        project: &Project,
        analyzer: &StalenessAnalyzer,
        results: &HashMap<ProjectId, RunResult>,
        report: &mut BuildReport,
    ) -> (BuildStatus, Option<String>, Vec<Diagnostic>) {
        let loaded = self.session.store.load(project);
        let previous_signature = loaded.usable().map(|info| info.signature.clone());

        if let Some(missing) = project.unresolved_references.first() {
            let status = BuildStatus::Blocked {
                by: missing.clone(),
            };
            return (status, previous_signature, Vec::new());
        }

        let dependencies: Vec<(PathBuf, RunResult)> = graph
            .dependencies(project.id)
            .map(|dep| {
                let path = graph.project(dep).config_path().to_path_buf();
                let result = match results.get(&dep) {
                    Some(result) => result.clone(),
                    None => self.result_on_disk(graph.project(dep)),
                };
                (path, result)
            })
            .collect();

        if let Some((path, _)) = dependencies.iter().find(|(_, r)| r.status.is_failure()) {
            let status = BuildStatus::Blocked { by: path.clone() };
            return (status, previous_signature, Vec::new());
        }

        let snapshot = FileSnapshot::capture(project.root_files(), &mut self.session.versions);
        let dependency_results: Vec<DependencyResult<'_>> = dependencies
            .iter()
            .map(|(path, result)| DependencyResult {
                config_path: path,
                status: &result.status,
                signature: result.signature.as_deref(),
            })
            .collect();

        let status = analyzer.classify(project, &loaded, &snapshot, &dependency_results);
        match status {
            BuildStatus::UpToDate => {
                let diagnostics = loaded
                    .usable()
                    .map(|info| info.diagnostics.clone())
                    .unwrap_or_default();
                (BuildStatus::UpToDate, previous_signature, diagnostics)
            }
            BuildStatus::NeedsBuild { reason } => {
                debug!(project = %project.name(), %reason, "project is stale");
                if self.options.dry_run {
                    return (
                        BuildStatus::NeedsBuild { reason },
                        previous_signature,
                        Vec::new(),
                    );
                }
                let dependency_signatures: BTreeMap<PathBuf, String> = dependencies
                    .iter()
                    .filter_map(|(path, r)| r.signature.clone().map(|s| (path.clone(), s)))
                    .collect();
                report.stats.front_end_invocations += 1;
                let built = self.build(project, &snapshot, loaded, dependency_signatures);
                (built.status, built.signature, built.diagnostics)
            }
            other => (other, previous_signature, Vec::new()),
        }
    }

    /// Run front end, emitter and store for a stale project
    fn build(
        &mut self,
        project: &Project,
        snapshot: &FileSnapshot,
        loaded: LoadedBuildInfo,
        dependency_signatures: BTreeMap<PathBuf, String>,
    ) -> Built {
        let previous = loaded.into_usable();
        let previous_signature = previous.as_ref().map(|info| info.signature.clone());
        let failed = |reason: FailureReason, diagnostics: Vec<Diagnostic>| Built {
            status: BuildStatus::Failed { reason },
            signature: previous_signature.clone(),
            diagnostics,
        };

        debug!(project = %project.name(), status = %BuildStatus::Building, "invoking front end");
        let mut cx = CheckContext {
            cancel: &self.cancel,
            packages: &mut self.session.packages,
        };
        let checked = match self.front_end.check(project, snapshot, &mut cx) {
            Ok(checked) => checked,
            Err(_) => return failed(FailureReason::Cancelled, Vec::new()),
        };

        let errors = checked.error_count();
        if errors > 0 && project.options().no_emit_on_error {
            return failed(FailureReason::Compile { errors }, checked.diagnostics);
        }

        // From here on the outputs on disk may no longer match the previous
        // build info, so every failure path drops it.
        let emitted = match self.emitter.emit(project, &checked.program) {
            Ok(emitted) => emitted,
            Err(error) => {
                self.invalidate(project);
                let message = BuildError::Emit {
                    project: project.config_path().to_path_buf(),
                    error,
                }
                .to_string();
                return Built {
                    status: BuildStatus::Failed {
                        reason: FailureReason::Io { message },
                    },
                    signature: None,
                    diagnostics: checked.diagnostics,
                };
            }
        };

        if errors > 0 {
            self.invalidate(project);
            return Built {
                status: BuildStatus::Failed {
                    reason: FailureReason::Compile { errors },
                },
                signature: None,
                diagnostics: checked.diagnostics,
            };
        }

        if let Some(previous) = &previous {
            remove_stale_outputs(&previous.emitted, &emitted);
        }

        let surface = checked.program.surface();
        let info = BuildInfo {
            version: BUILD_INFO_VERSION.to_string(),
            options_digest: project.options_digest().to_string(),
            files: snapshot
                .records()
                .iter()
                .filter_map(|r| r.version.clone().map(|v| (r.path.clone(), v)))
                .collect(),
            file_signatures: surface.files,
            signature: surface.program.clone(),
            dependency_signatures,
            diagnostics: checked.diagnostics.clone(),
            emitted,
            complete: true,
        };

        if let Err(error) = self.session.store.save(project, &info) {
            self.invalidate(project);
            return Built {
                status: BuildStatus::Failed {
                    reason: FailureReason::Io {
                        message: error.to_string(),
                    },
                },
                signature: None,
                diagnostics: checked.diagnostics,
            };
        }

        let status = match &previous_signature {
            Some(previous) if *previous != surface.program => BuildStatus::SucceededSurfaceChanged,
            _ => BuildStatus::Succeeded,
        };
        Built {
            status,
            signature: Some(surface.program),
            diagnostics: checked.diagnostics,
        }
    }

    /// Drop build info that no longer describes the outputs on disk
    fn invalidate(&mut self, project: &Project) {
        match self.session.store.remove(project) {
            Ok(true) => debug!(project = %project.name(), "discarded build info of overwritten outputs"),
            Ok(false) => {}
            Err(error) => warn!(project = %project.name(), %error, "could not discard build info"),
        }
    }

    /// Result of a project outside the current run, read from its build info
    fn result_on_disk(&self, project: &Project) -> RunResult {
        match self.session.store.load(project).into_usable() {
            Some(info) => RunResult {
                status: BuildStatus::UpToDate,
                signature: Some(info.signature),
            },
            None => RunResult {
                status: BuildStatus::Unbuilt,
                signature: None,
            },
        }
    }
}

/// Map config paths (files or directories) to project ids
pub fn resolve_ids(graph: &ProjectGraph, config_paths: &[PathBuf]) -> BuildResult<Vec<ProjectId>> {
    config_paths
        .iter()
        .map(|path| {
            strata_config::ConfigLoader::resolve_config_path(path)
                .ok()
                .and_then(|canonical| graph.find(&canonical))
                .ok_or_else(|| BuildError::project_not_found(path))
        })
        .collect()
}

fn outcome(
    project: &Project,
    status: BuildStatus,
    diagnostics: Vec<Diagnostic>,
    started: Instant,
) -> ProjectOutcome {
    ProjectOutcome {
        config_path: project.config_path().to_path_buf(),
        name: project.name(),
        status,
        diagnostics,
        elapsed: started.elapsed(),
    }
}

/// Name for a path that may be a config file or a project directory
fn display_name(path: &Path) -> String {
    let dir = if path.file_name() == Some(std::ffi::OsStr::new(strata_config::CONFIG_FILE_NAME)) {
        path.parent()
    } else {
        Some(path)
    };
    dir.and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Delete outputs of the previous build that this build no longer produces
fn remove_stale_outputs(previous: &[PathBuf], current: &[PathBuf]) {
    let current: HashSet<&PathBuf> = current.iter().collect();
    for stale in previous.iter().filter(|p| !current.contains(p)) {
        if let Err(e) = fs::remove_file(stale) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %stale.display(), error = %e, "could not remove stale output");
            }
        }
    }
}
