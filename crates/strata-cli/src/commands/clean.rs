//! Clean command - delete outputs and build info without building

use anyhow::{Context, Result};
use std::path::PathBuf;
use strata_build::{load_graph, resolve_ids, DeclarationEmitter, DeclarationFrontEnd, DefaultOrchestrator};
use tracing::info;

pub fn run(paths: &[PathBuf]) -> Result<i32> {
    let graph = load_graph(paths)?;
    let roots = resolve_ids(&graph, paths).context("Cannot clean a project that failed to load")?;

    let mut orchestrator =
        DefaultOrchestrator::new(DeclarationFrontEnd::new(), DeclarationEmitter::new());
    let removed = orchestrator.clean(&graph, &roots)?;

    for path in &removed {
        info!(path = %path.display(), "removed");
    }
    println!("Removed {} file(s)", removed.len());
    Ok(0)
}
