//! Watch mode - keep a project graph built while files change

use super::report;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use strata_build::{
    load_graph, DeclarationEmitter, DeclarationFrontEnd, DefaultOrchestrator, ProjectGraph,
    SessionEvent, ThreadTimerHost, WatchOptions, WatchSession,
};
use strata_config::SessionConfig;
use tracing::{debug, warn};

/// Watch command arguments
#[derive(Debug, Default)]
pub struct WatchArgs {
    pub paths: Vec<PathBuf>,
    /// Overrides the session config and STRATA_DEBOUNCE_MS
    pub debounce_ms: Option<u64>,
}

/// Build once, then rebuild on change until the process is interrupted
pub fn run(args: WatchArgs) -> Result<i32> {
    if args.debounce_ms == Some(0) {
        anyhow::bail!("--debounce-ms must be greater than zero");
    }
    let settings = SessionConfig::load().context("Failed to load session config")?;
    let debounce = args
        .debounce_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.debounce());

    let graph = load_graph(&args.paths)?;
    let watch_root = watch_root(&graph).context("No project to watch")?;

    let (inbox, events) = mpsc::channel();
    let file_events = inbox.clone();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        match event {
            Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                for path in event.paths {
                    // The receiver is gone once the session shut down
                    let _ = file_events.send(SessionEvent::FileChanged(path));
                }
            }
            Ok(_) => {}
            Err(error) => warn!(%error, "file watcher error"),
        }
    })
    .context("Failed to create file watcher")?;
    watcher
        .watch(&watch_root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", watch_root.display()))?;
    debug!(root = %watch_root.display(), "watching");

    let roots = args.paths.clone();
    let orchestrator =
        DefaultOrchestrator::new(DeclarationFrontEnd::new(), DeclarationEmitter::new());
    let options = WatchOptions {
        debounce,
        reclaim_delay: settings.reclaim_delay(),
    };
    let host = ThreadTimerHost::new(inbox, SessionEvent::TimerFired);
    let mut session = WatchSession::new(
        orchestrator,
        graph,
        Box::new(move || load_graph(&roots)),
        host,
        options,
    )
    .with_reporter(|report| {
        report::print_human(report);
        println!("Watching for changes...");
    });

    println!(
        "Watching {} project(s) under {}",
        session.graph().len(),
        watch_root.display()
    );
    println!("Press Ctrl+C to stop\n");

    session.run(&events);
    drop(watcher);
    Ok(0)
}

/// Deepest directory containing every project and extended config
fn watch_root(graph: &ProjectGraph) -> Option<PathBuf> {
    let mut dirs = graph.projects().iter().flat_map(|project| {
        let extended = project
            .config
            .extended_configs
            .iter()
            .filter_map(|c| c.parent());
        std::iter::once(project.config.project_dir()).chain(extended)
    });

    let first = dirs.next()?.to_path_buf();
    Some(dirs.fold(first, |common, dir| common_ancestor(&common, dir)))
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}
