//! Strata build orchestration
//!
//! Incremental builds for graphs of Strata projects:
//! - Project reference graph with deterministic build order and cycle rejection
//! - Persisted per-project build info with atomic writes
//! - Staleness classification separating own edits from dependency surface changes
//! - Package manifest cache shared with the front end
//! - Orchestrator with noEmitOnError, fail-fast and cancellation
//! - Debounced operation scheduler and watch session

pub mod build_info;
pub mod declarations;
pub mod error;
pub mod frontend;
pub mod graph;
pub mod orchestrator;
pub mod package_cache;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod staleness;
pub mod status;
pub mod watch;

// Re-export main types
pub use build_info::{BuildInfo, BuildStateStore, LoadedBuildInfo, BUILD_INFO_VERSION};
pub use declarations::{DeclarationEmitter, DeclarationFrontEnd, DeclarationProgram};
pub use error::{BuildError, BuildResult};
pub use frontend::{
    CancellationToken, Cancelled, CheckContext, Checked, Diagnostic, Emitter, FrontEnd, Program,
    Severity, SurfaceSignature,
};
pub use graph::{InvalidProject, Project, ProjectGraph, ProjectId, ProjectReference};
pub use orchestrator::{
    resolve_ids, BuildOptions, BuildOrchestrator, BuildReport, BuildStats, ProjectOutcome,
};
pub use package_cache::{
    FsManifestSource, ManifestSource, PackageMetadata, PackageMetadataCache, Ternary,
};
pub use scheduler::{
    Fired, ManualTimerHost, OperationScheduler, Reclaim, ThreadTimerHost, TimerHost, TimerToken,
};
pub use session::BuildSession;
pub use snapshot::{FileRecord, FileSnapshot, VersionCache};
pub use staleness::{DependencyResult, StalenessAnalyzer};
pub use status::{BuildStatus, FailureReason, StaleReason};
pub use watch::{GraphLoader, SessionEvent, WatchOptions, WatchSession};

/// Orchestrator wired to the built-in declaration front end and emitter
pub type DefaultOrchestrator = BuildOrchestrator<DeclarationFrontEnd, DeclarationEmitter>;

/// Load `roots` and their references and build the project graph
///
/// Configs that fail to load become invalid entries of the graph; only a
/// reference cycle is an error.
pub fn load_graph(roots: &[std::path::PathBuf]) -> BuildResult<ProjectGraph> {
    let closure = strata_config::ConfigLoader::new().load_closure(roots);
    ProjectGraph::from_closure(closure)
}
