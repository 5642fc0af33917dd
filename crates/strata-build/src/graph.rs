//! Project reference graph and build order
//!
//! Projects are ordered by a depth-first post-order walk: every project comes
//! after everything it references, and independent projects keep the order in
//! which their configs were declared. A reference cycle rejects the whole
//! graph; no partial order is ever produced.
use crate::error::{BuildError, BuildResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use strata_config::{LoadedClosure, ResolvedConfig, ResolvedOptions};

/// Index of a project inside a [`ProjectGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(usize);

impl ProjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An edge to a referenced project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectReference {
    pub target: ProjectId,
    pub prepend: bool,
}

/// A compilation unit in the graph
#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub config: ResolvedConfig,
    /// Resolved references, in declaration order
    pub references: Vec<ProjectReference>,
    /// References whose config is not part of the graph
    pub unresolved_references: Vec<PathBuf>,
}

impl Project {
    /// Canonical config path
    pub fn config_path(&self) -> &Path {
        &self.config.config_path
    }

    /// Display name
    pub fn name(&self) -> String {
        self.config.name()
    }

    pub fn root_files(&self) -> &[PathBuf] {
        &self.config.root_files
    }

    pub fn build_info_path(&self) -> &Path {
        &self.config.build_info_path
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.config.options
    }

    pub fn options_digest(&self) -> &str {
        &self.config.options_digest
    }

    pub fn out_dir(&self) -> PathBuf {
        self.config.out_dir()
    }
}

/// A config that could not be turned into a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProject {
    pub path: PathBuf,
    pub error: String,
}

/// Dependency graph of projects with a precomputed build order
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    projects: Vec<Project>,
    index: HashMap<PathBuf, ProjectId>,
    order: Vec<ProjectId>,
    invalid: Vec<InvalidProject>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl ProjectGraph {
    /// Build the graph from resolved configs, in declaration order
    ///
    /// Configs with an identical canonical path are merged (first wins).
    /// Fails with [`BuildError::CircularReference`] if the references form a cycle.
    pub fn build(configs: Vec<ResolvedConfig>) -> BuildResult<Self> {
        let mut graph = ProjectGraph::default();

        for config in configs {
            if graph.index.contains_key(&config.config_path) {
                continue;
            }
            let id = ProjectId(graph.projects.len());
            graph.index.insert(config.config_path.clone(), id);
            graph.projects.push(Project {
                id,
                config,
                references: Vec::new(),
                unresolved_references: Vec::new(),
            });
        }

        for i in 0..graph.projects.len() {
            let mut references = Vec::new();
            let mut unresolved = Vec::new();
            let mut seen = HashSet::new();
            for reference in &graph.projects[i].config.references {
                match graph.index.get(&reference.path) {
                    Some(&target) => {
                        if seen.insert(target) {
                            references.push(ProjectReference {
                                target,
                                prepend: reference.prepend,
                            });
                        }
                    }
                    None => unresolved.push(reference.path.clone()),
                }
            }
            graph.projects[i].references = references;
            graph.projects[i].unresolved_references = unresolved;
        }

        graph.order = graph.compute_build_order()?;
        Ok(graph)
    }

    /// Build the graph from a loaded closure, keeping its load failures
    pub fn from_closure(closure: LoadedClosure) -> BuildResult<Self> {
        let mut graph = Self::build(closure.configs)?;
        graph.invalid = closure
            .failures
            .into_iter()
            .map(|f| InvalidProject {
                path: f.path,
                error: f.error.to_string(),
            })
            .collect();
        Ok(graph)
    }

    /// Topological build order, dependencies first
    pub fn order(&self) -> &[ProjectId] {
        &self.order
    }

    pub fn project(&self, id: ProjectId) -> &Project {
        &self.projects[id.0]
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Configs that failed to load
    pub fn invalid(&self) -> &[InvalidProject] {
        &self.invalid
    }

    /// Look up a project by config path
    pub fn find(&self, config_path: &Path) -> Option<ProjectId> {
        self.index.get(config_path).copied()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Projects directly referenced by `id`
    pub fn dependencies(&self, id: ProjectId) -> impl Iterator<Item = ProjectId> + '_ {
        self.projects[id.0].references.iter().map(|r| r.target)
    }

    /// Projects that directly reference `id`, in build order
    pub fn dependents(&self, id: ProjectId) -> Vec<ProjectId> {
        self.order
            .iter()
            .copied()
            .filter(|&p| self.dependencies(p).any(|d| d == id))
            .collect()
    }

    /// `roots` plus everything they transitively reference, in build order
    pub fn closure(&self, roots: &[ProjectId]) -> Vec<ProjectId> {
        let mut reached = HashSet::new();
        let mut stack: Vec<ProjectId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if reached.insert(id) {
                stack.extend(self.dependencies(id));
            }
        }
        self.in_order(&reached)
    }

    /// `seeds` plus every project that transitively references them, in build order
    pub fn dependents_closure(&self, seeds: &[ProjectId]) -> Vec<ProjectId> {
        let mut reached: HashSet<ProjectId> = seeds.iter().copied().collect();
        for &id in &self.order {
            if self.dependencies(id).any(|d| reached.contains(&d)) {
                reached.insert(id);
            }
        }
        self.in_order(&reached)
    }

    /// Group the build order into levels with no edges inside a level
    pub fn build_levels(&self) -> Vec<Vec<ProjectId>> {
        let mut level_of = vec![0usize; self.projects.len()];
        let mut levels: Vec<Vec<ProjectId>> = Vec::new();

        for &id in &self.order {
            let level = self
                .dependencies(id)
                .map(|d| level_of[d.0] + 1)
                .max()
                .unwrap_or(0);
            level_of[id.0] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }

        levels
    }

    /// Projects whose inputs or configs include `path`
    pub fn projects_owning(&self, path: &Path) -> Vec<ProjectId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.projects[id.0].config.owns_file(path))
            .collect()
    }

    fn in_order(&self, set: &HashSet<ProjectId>) -> Vec<ProjectId> {
        self.order
            .iter()
            .copied()
            .filter(|id| set.contains(id))
            .collect()
    }

    /// Depth-first post-order over projects in declaration order
    fn compute_build_order(&self) -> BuildResult<Vec<ProjectId>> {
        let mut marks = vec![Mark::Unvisited; self.projects.len()];
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.projects.len());

        for i in 0..self.projects.len() {
            if let Err(cycle) = self.visit(ProjectId(i), &mut marks, &mut stack, &mut order) {
                return Err(BuildError::CircularReference {
                    cycle: cycle
                        .into_iter()
                        .map(|id| self.projects[id.0].config.config_path.clone())
                        .collect(),
                });
            }
        }

        Ok(order)
    }

    fn visit(
        &self,
        id: ProjectId,
        marks: &mut [Mark],
        stack: &mut Vec<ProjectId>,
        order: &mut Vec<ProjectId>,
    ) -> Result<(), Vec<ProjectId>> {
        match marks[id.0] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                // Found cycle - extract it from the recursion stack
                let start = stack.iter().position(|&p| p == id).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(id);
                return Err(cycle);
            }
            Mark::Unvisited => {}
        }

        marks[id.0] = Mark::Visiting;
        stack.push(id);

        for reference in &self.projects[id.0].references {
            self.visit(reference.target, marks, stack, order)?;
        }

        stack.pop();
        marks[id.0] = Mark::Done;
        order.push(id);
        Ok(())
    }
}
