//! Seams to the compiler front end and emitter
//!
//! The orchestrator never parses or checks code itself. It hands a project's
//! file snapshot to a [`FrontEnd`], asks the resulting [`Program`] for its
//! public surface, and passes the program to an [`Emitter`].

use crate::graph::Project;
use crate::package_cache::PackageMetadataCache;
use crate::snapshot::{hash_bytes, FileSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A message reported by the front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(file: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            file,
            message: message.into(),
        }
    }

    pub fn warning(file: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            file,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.file {
            Some(file) => write!(f, "{}: {}: {}", file.display(), level, self.message),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

/// Raised by front-end work that observed a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared flag polled by long-running front-end work
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation so the token can be reused for the next run
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Stable hash of a program's externally visible declarations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceSignature {
    /// Whole-program signature
    pub program: String,
    /// Per-file declaration signatures
    pub files: BTreeMap<PathBuf, String>,
}

impl SurfaceSignature {
    /// Combine per-file signatures into a program signature
    pub fn from_files(files: BTreeMap<PathBuf, String>) -> Self {
        let mut combined = Vec::new();
        for (path, signature) in &files {
            combined.extend_from_slice(path.to_string_lossy().as_bytes());
            combined.push(0);
            combined.extend_from_slice(signature.as_bytes());
            combined.push(b'\n');
        }
        Self {
            program: hash_bytes(&combined),
            files,
        }
    }
}

/// Services available to the front end while checking one project
pub struct CheckContext<'a> {
    pub cancel: &'a CancellationToken,
    pub packages: &'a mut PackageMetadataCache,
}

/// Result of checking a project
#[derive(Debug)]
pub struct Checked<P> {
    pub diagnostics: Vec<Diagnostic>,
    pub program: P,
}

impl<P> Checked<P> {
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }
}

/// A checked program
pub trait Program {
    /// Compute the public surface; only called after a successful check
    fn surface(&self) -> SurfaceSignature;
}

/// Parser + type checker for one project
pub trait FrontEnd {
    type Program: Program;

    /// Check `project` using the file versions in `snapshot`
    ///
    /// Implementations poll `cx.cancel` at bounded intervals.
    fn check(
        &self,
        project: &Project,
        snapshot: &FileSnapshot,
        cx: &mut CheckContext<'_>,
    ) -> Result<Checked<Self::Program>, Cancelled>;
}

/// Writes output artifacts for a checked program
pub trait Emitter<P> {
    /// Emit outputs, returning every file written
    fn emit(&self, project: &Project, program: &P) -> std::io::Result<Vec<PathBuf>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));

        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_surface_signature_depends_on_files() {
        let a = SurfaceSignature::from_files([(PathBuf::from("a.st"), "x".to_string())].into());
        let b = SurfaceSignature::from_files([(PathBuf::from("a.st"), "y".to_string())].into());
        let a2 = SurfaceSignature::from_files([(PathBuf::from("a.st"), "x".to_string())].into());
        assert_ne!(a.program, b.program);
        assert_eq!(a.program, a2.program);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error(Some(PathBuf::from("src/a.st")), "unbalanced braces");
        assert_eq!(diag.to_string(), "src/a.st: error: unbalanced braces");
        assert!(diag.is_error());
        assert!(!Diagnostic::warning(None, "w").is_error());
    }
}
