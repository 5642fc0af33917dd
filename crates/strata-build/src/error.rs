/// Build system error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid project config {path}: {error}")]
    Config { path: PathBuf, error: String },

    #[error("Project references form a cycle: {}", format_cycle(.cycle))]
    CircularReference { cycle: Vec<PathBuf> },

    #[error("Project not found in graph: {path}")]
    ProjectNotFound { path: PathBuf },

    #[error("Build info at {path} could not be written: {error}")]
    BuildInfoWrite {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Emit failed for {project}: {error}")]
    Emit {
        project: PathBuf,
        error: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl BuildError {
    /// Create a config error
    pub fn config(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a project-not-found error
    pub fn project_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ProjectNotFound { path: path.into() }
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
