//! Build command - bring a project graph up to date

use super::report;
use anyhow::{Context, Result};
use std::path::PathBuf;
use strata_build::{
    load_graph, BuildOptions, BuildReport, DeclarationEmitter, DeclarationFrontEnd,
    DefaultOrchestrator,
};
use strata_config::SessionConfig;
use tracing::info;

/// Build command arguments
#[derive(Debug, Default)]
pub struct BuildArgs {
    /// Project directories or config files
    pub paths: Vec<PathBuf>,
    /// Rebuild every project regardless of build info
    pub force: bool,
    /// Stop after the first failed project
    pub fail_fast: bool,
    /// Classify only
    pub dry_run: bool,
    /// JSON output
    pub json: bool,
}

/// Run the build command and return the process exit code
pub fn run(args: BuildArgs) -> Result<i32> {
    let settings = SessionConfig::load().context("Failed to load session config")?;
    let graph = load_graph(&args.paths)?;
    info!(projects = graph.len(), invalid = graph.invalid().len(), "loaded project graph");

    let options = BuildOptions {
        fail_fast: args.fail_fast || settings.fail_fast(),
        force: args.force,
        dry_run: args.dry_run,
    };
    let mut orchestrator =
        DefaultOrchestrator::new(DeclarationFrontEnd::new(), DeclarationEmitter::new())
            .with_options(options);

    let report = orchestrator.run(&graph);
    report::print(&report, args.json)?;
    Ok(exit_code(&report, args.dry_run))
}

/// A dry run leaves stale projects pending, so only failures count
fn exit_code(report: &BuildReport, dry_run: bool) -> i32 {
    if dry_run {
        i32::from(report.has_failures())
    } else {
        report.exit_code()
    }
}
