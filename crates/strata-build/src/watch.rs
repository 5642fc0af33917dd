//! Long-running watch session
//!
//! All work happens on the thread that drains the session inbox. File
//! watchers and timer threads only post [`SessionEvent`]s; the session turns
//! them into debounced rebuilds of the affected part of the graph.

use crate::error::BuildResult;
use crate::frontend::{Emitter, FrontEnd};
use crate::graph::ProjectGraph;
use crate::orchestrator::{BuildOrchestrator, BuildReport};
use crate::package_cache::MANIFEST_FILE_NAME;
use crate::scheduler::{run_reclaim, Fired, OperationScheduler, Reclaim, TimerHost, TimerToken};
use crate::session::resident_memory;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use strata_config::{is_declaration_output, CONFIG_FILE_NAME, SOURCE_EXTENSION};
use tracing::{debug, info, warn};

/// Operation id of the debounced rebuild
pub const BUILD_OPERATION: &str = "build";
/// Operation id of the debounced graph reload
pub const RELOAD_OPERATION: &str = "reload";

/// Message delivered to a watch session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    FileChanged(PathBuf),
    TimerFired(TimerToken),
    Shutdown,
}

/// Timing of a watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub reclaim_delay: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            reclaim_delay: Duration::from_millis(5000),
        }
    }
}

/// Reloads the project graph after a config change
pub type GraphLoader = Box<dyn FnMut() -> BuildResult<ProjectGraph>>;

type Reporter = Box<dyn FnMut(&BuildReport)>;

/// What a changed path means to the session
#[derive(Debug, PartialEq, Eq)]
enum ChangeKind {
    Manifest,
    Config,
    Source,
    Ignored,
}

/// Watch-mode driver around a [`BuildOrchestrator`]
pub struct WatchSession<F, E, H>
where
    F: FrontEnd + 'static,
    E: Emitter<F::Program> + 'static,
    H: TimerHost + 'static,
{
    orchestrator: BuildOrchestrator<F, E>,
    graph: ProjectGraph,
    loader: GraphLoader,
    scheduler: OperationScheduler<Self, H>,
    changed: BTreeSet<PathBuf>,
    options: WatchOptions,
    reporter: Reporter,
    last_report: Option<BuildReport>,
    builds: usize,
}

impl<F, E, H> WatchSession<F, E, H>
where
    F: FrontEnd + 'static,
    E: Emitter<F::Program> + 'static,
    H: TimerHost + 'static,
{
    pub fn new(
        orchestrator: BuildOrchestrator<F, E>,
        graph: ProjectGraph,
        loader: GraphLoader,
        host: H,
        options: WatchOptions,
    ) -> Self {
        Self {
            orchestrator,
            graph,
            loader,
            scheduler: OperationScheduler::new(host),
            changed: BTreeSet::new(),
            options,
            reporter: Box::new(|_| {}),
            last_report: None,
            builds: 0,
        }
    }

    /// Called with every report the session produces
    pub fn with_reporter(mut self, reporter: impl FnMut(&BuildReport) + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    pub fn orchestrator(&self) -> &BuildOrchestrator<F, E> {
        &self.orchestrator
    }

    pub fn last_report(&self) -> Option<&BuildReport> {
        self.last_report.as_ref()
    }

    /// Number of builds run so far
    pub fn builds(&self) -> usize {
        self.builds
    }

    /// Changed paths waiting for the next debounced build
    pub fn pending_changes(&self) -> impl Iterator<Item = &Path> {
        self.changed.iter().map(PathBuf::as_path)
    }

    pub fn is_pending(&self, operation: &str) -> bool {
        self.scheduler.is_pending(operation)
    }

    pub fn reclaim_pending(&self) -> bool {
        self.scheduler.reclaim_pending()
    }

    pub fn host(&self) -> &H {
        self.scheduler.host()
    }

    /// Build everything that is stale
    pub fn build_all(&mut self) {
        self.changed.clear();
        self.orchestrator.cancellation().reset();
        let report = self.orchestrator.run(&self.graph);
        self.finish_build(report);
    }

    /// Drain `inbox` until shutdown or until every sender is gone
    pub fn run(&mut self, inbox: &Receiver<SessionEvent>) {
        self.build_all();
        while let Ok(event) = inbox.recv() {
            if !self.handle(event) {
                break;
            }
        }
        info!("watch session stopped");
    }

    /// Process one event; returns `false` on shutdown
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::FileChanged(path) => {
                self.file_changed(path);
                true
            }
            SessionEvent::TimerFired(token) => {
                self.timer_fired(token);
                true
            }
            SessionEvent::Shutdown => false,
        }
    }

    fn file_changed(&mut self, path: PathBuf) {
        match self.classify(&path) {
            ChangeKind::Manifest => {
                let packages = &mut self.orchestrator.session_mut().packages;
                if path.exists() {
                    packages.add_or_update(&path);
                } else {
                    packages.delete(&path);
                }
            }
            ChangeKind::Config => {
                debug!(path = %path.display(), "project config changed");
                let delay = self.options.debounce;
                self.schedule(RELOAD_OPERATION, delay, |session| session.reload());
            }
            ChangeKind::Source => {
                // Added or removed inputs change a project's file set
                let owned = !self.graph.projects_owning(&path).is_empty();
                if !owned || !path.exists() {
                    let delay = self.options.debounce;
                    self.schedule(RELOAD_OPERATION, delay, |session| session.reload());
                    return;
                }
                self.orchestrator.session_mut().versions.invalidate(&path);
                self.changed.insert(path);
                let delay = self.options.debounce;
                self.schedule(BUILD_OPERATION, delay, |session| session.build_changed());
            }
            ChangeKind::Ignored => {}
        }
    }

    fn classify(&self, path: &Path) -> ChangeKind {
        let file_name = path.file_name().and_then(|n| n.to_str());
        if file_name == Some(MANIFEST_FILE_NAME) {
            return ChangeKind::Manifest;
        }

        let is_config = file_name == Some(CONFIG_FILE_NAME)
            || self
                .graph
                .projects()
                .iter()
                .any(|p| p.config.extended_configs.iter().any(|c| c == path));
        if is_config {
            return ChangeKind::Config;
        }

        let is_source = path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
            && !is_declaration_output(path);
        let in_project = self.graph.projects().iter().any(|p| {
            let in_out_dir = p.options().out_dir.as_ref().is_some_and(|out| path.starts_with(out));
            path.starts_with(p.config.project_dir()) && !in_out_dir
        });
        if is_source && in_project {
            ChangeKind::Source
        } else {
            ChangeKind::Ignored
        }
    }

    fn timer_fired(&mut self, token: TimerToken) {
        match self.scheduler.take(token) {
            Some(Fired::Operation { id, callback }) => {
                debug!(operation = %id, "running scheduled operation");
                callback(self);
            }
            Some(Fired::Reclaim) => run_reclaim(self),
            None => {}
        }
    }

    fn schedule(&mut self, id: &str, delay: Duration, callback: impl FnOnce(&mut Self) + 'static) {
        self.scheduler.schedule(id, delay, callback);
    }

    /// Rebuild the projects owning changed files and everything depending on them
    fn build_changed(&mut self) {
        let changed = std::mem::take(&mut self.changed);
        let mut owners = Vec::new();
        for path in &changed {
            owners.extend(self.graph.projects_owning(path));
        }
        owners.sort();
        owners.dedup();

        if owners.is_empty() {
            debug!("no project owns the changed files");
            return;
        }

        let affected = self.graph.dependents_closure(&owners);
        info!(
            changed = changed.len(),
            projects = affected.len(),
            "rebuilding affected projects"
        );
        self.orchestrator.cancellation().reset();
        let report = self.orchestrator.run_subset(&self.graph, &affected);
        self.finish_build(report);
    }

    fn reload(&mut self) {
        match (self.loader)() {
            Ok(graph) => {
                info!(projects = graph.len(), "reloaded project graph");
                self.graph = graph;
                self.build_all();
            }
            Err(error) => {
                warn!(%error, "keeping previous project graph");
            }
        }
    }

    fn finish_build(&mut self, report: BuildReport) {
        self.builds += 1;
        (self.reporter)(&report);
        self.last_report = Some(report);
        let delay = self.options.reclaim_delay;
        self.scheduler.request_reclaim(delay);
    }
}

impl<F, E, H> Reclaim for WatchSession<F, E, H>
where
    F: FrontEnd + 'static,
    E: Emitter<F::Program> + 'static,
    H: TimerHost + 'static,
{
    fn reclaim(&mut self) {
        let trimmed = self.orchestrator.session_mut().trim(&self.graph);
        debug!(version_entries = trimmed.version_entries, "trimmed session caches");
    }

    fn memory_usage(&self) -> Option<u64> {
        resident_memory()
    }
}
