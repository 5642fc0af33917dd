//! Per-run project status

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a project has to be rebuilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaleReason {
    /// No build info exists
    Unbuilt,
    /// Build info exists but cannot be trusted
    Corrupt { reason: String },
    /// Rebuild requested by the caller
    Forced,
    /// Compiler options changed
    OptionsChanged,
    /// A root file was added, removed or edited
    OwnFilesChanged { path: PathBuf },
    /// A referenced project's public surface changed
    DependencySurfaceChanged { dependency: PathBuf },
    /// A reference was added or removed
    ReferencesChanged,
}

/// Why a project build did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The front end reported errors
    Compile { errors: usize },
    /// The build was cancelled
    Cancelled,
    /// Writing outputs or build info failed
    Io { message: String },
    /// The project config could not be loaded
    Config { message: String },
}

/// Status of a project within one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    /// Not processed in this run
    Unbuilt,
    UpToDate,
    NeedsBuild { reason: StaleReason },
    Building,
    /// Built; public surface unchanged
    Succeeded,
    /// Built; public surface changed, dependents must rebuild
    SucceededSurfaceChanged,
    Failed { reason: FailureReason },
    /// Not built because a dependency failed or is missing
    Blocked { by: PathBuf },
}

impl BuildStatus {
    /// Whether the run is done with this project
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UpToDate
                | Self::Succeeded
                | Self::SucceededSurfaceChanged
                | Self::Failed { .. }
                | Self::Blocked { .. }
        )
    }

    /// Counts as success for the exit code
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::UpToDate | Self::Succeeded | Self::SucceededSurfaceChanged
        )
    }

    /// Failed or blocked
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Blocked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unbuilt => "unbuilt",
            Self::UpToDate => "up to date",
            Self::NeedsBuild { .. } => "needs build",
            Self::Building => "building",
            Self::Succeeded => "succeeded",
            Self::SucceededSurfaceChanged => "succeeded (surface changed)",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
        }
    }
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbuilt => write!(f, "no build info"),
            Self::Corrupt { reason } => write!(f, "build info unusable ({})", reason),
            Self::Forced => write!(f, "forced"),
            Self::OptionsChanged => write!(f, "compiler options changed"),
            Self::OwnFilesChanged { path } => write!(f, "{} changed", path.display()),
            Self::DependencySurfaceChanged { dependency } => {
                write!(f, "public surface of {} changed", dependency.display())
            }
            Self::ReferencesChanged => write!(f, "project references changed"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile { errors } => write!(f, "{} error(s)", errors),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io { message } => write!(f, "{}", message),
            Self::Config { message } => write!(f, "{}", message),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedsBuild { reason } => write!(f, "needs build: {}", reason),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            Self::Blocked { by } => write!(f, "blocked by {}", by.display()),
            other => write!(f, "{}", other.label()),
        }
    }
}
