//! Scratch multi-project workspaces for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use strata_build::{
    load_graph, BuildOptions, BuildReport, DeclarationEmitter, DeclarationFrontEnd,
    DefaultOrchestrator, ProjectGraph,
};
use tempfile::TempDir;

pub struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        fs::read(self.path(relative)).unwrap()
    }

    /// Write `<name>/strata.json` and the given source files under `<name>/`
    pub fn project(&self, name: &str, config: &str, files: &[(&str, &str)]) {
        self.write(&format!("{}/strata.json", name), config);
        for (file, content) in files {
            self.write(&format!("{}/{}", name, file), content);
        }
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.path(&format!("{}/strata.json", name))
    }

    pub fn roots(&self, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| self.path(n)).collect()
    }

    pub fn graph(&self, roots: &[&str]) -> ProjectGraph {
        load_graph(&self.roots(roots)).unwrap()
    }

    /// One-shot build with a fresh session, like a CLI invocation
    pub fn build(&self, roots: &[&str]) -> BuildReport {
        self.build_with(roots, BuildOptions::default())
    }

    pub fn build_with(&self, roots: &[&str], options: BuildOptions) -> BuildReport {
        let graph = self.graph(roots);
        orchestrator().with_options(options).run(&graph)
    }
}

pub fn orchestrator() -> DefaultOrchestrator {
    DefaultOrchestrator::new(DeclarationFrontEnd::new(), DeclarationEmitter::new())
}

pub const SHARED_CONFIG: &str = r#"{ "compilerOptions": { "outDir": "out", "declaration": true } }"#;

pub const SHARED_SOURCE: &str = "// geometry primitives
export interface Point { x: number }

export function origin(): Point {
  return { x: 0 };
}
";

pub const MAIN_CONFIG: &str = r#"{
  "compilerOptions": { "outDir": "out" },
  "references": [{ "path": "../shared" }]
}"#;

pub const MAIN_SOURCE: &str = "import { Point } from \"../shared/src/index\";

export function norm(p: Point): number {
  return p.x;
}
";

/// `shared` plus `main`, which references it
pub fn shared_and_main() -> Workspace {
    let ws = Workspace::new();
    ws.project("shared", SHARED_CONFIG, &[("src/index.st", SHARED_SOURCE)]);
    ws.project("main", MAIN_CONFIG, &[("src/index.st", MAIN_SOURCE)]);
    ws
}
