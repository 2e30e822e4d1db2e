use core::fmt;
use core::result::Result as CoreResult;
use std::io::Error as IoError;
use std::path::PathBuf;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for pipeline operations.
pub type Result<T> = CoreResult<T, Error>;

/// Failures raised while compiling edit operations into a diff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The anchor occurs more than once and no occurrence index was given.
    #[error(
        "anchor `{anchor}` occurs {occurrences} times in {path}; an occurrence index is required"
    )]
    AmbiguousAnchor {
        /// File the anchor was searched in
        path: String,
        /// Anchor text
        anchor: String,
        /// Number of literal matches found
        occurrences: usize,
    },

    /// The anchor (or the requested occurrence of it) does not exist.
    #[error("anchor `{anchor}` not found in {path}")]
    AnchorNotFound {
        /// File the anchor was searched in
        path: String,
        /// Anchor text
        anchor: String,
    },

    /// The end anchor does not come after the start anchor.
    #[error("end anchor `{end}` does not follow start anchor `{start}` in {path}")]
    InvalidRange {
        /// File the range was searched in
        path: String,
        /// Start anchor text
        start: String,
        /// End anchor text
        end: String,
    },
}

/// Category of a diff validation or application failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyErrorKind {
    /// Hunk context does not match the target file
    HunkMismatch,
    /// The file a hunk targets does not exist
    MissingFile,
    /// A file the diff creates already exists
    FileExists,
    /// A path resolves outside the repository root
    PathTraversal,
    /// The diff text could not be parsed
    Malformed,
    /// Hunks were written aside as `.rej` artifacts
    Rejected,
    /// The external apply tool failed
    Backend,
}

impl fmt::Display for ApplyErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::HunkMismatch => "hunk mismatch",
            Self::MissingFile => "missing file",
            Self::FileExists => "file already exists",
            Self::PathTraversal => "path traversal",
            Self::Malformed => "malformed diff",
            Self::Rejected => "rejected hunks",
            Self::Backend => "apply backend failure",
        };
        formatter.write_str(label)
    }
}

/// A diff could not be validated or applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct ApplyError {
    /// Failure category
    pub kind: ApplyErrorKind,
    /// Human-readable reason
    pub reason: String,
    /// Relative path of the file involved, if any
    pub path: Option<String>,
    /// Text of the offending hunk, if any
    pub offending_hunk: Option<String>,
    /// Reject artifacts written during a failed apply
    pub reject_files: Vec<PathBuf>,
}

impl ApplyError {
    /// Creates an error with only a kind and reason.
    pub fn new(kind: ApplyErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            path: None,
            offending_hunk: None,
            reject_files: Vec::new(),
        }
    }

    /// Attaches the path of the affected file.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches the text of the hunk that failed.
    #[must_use]
    pub fn with_hunk(mut self, hunk: impl Into<String>) -> Self {
        self.offending_hunk = Some(hunk.into());
        self
    }

    /// Attaches the reject artifacts written while applying.
    #[must_use]
    pub fn with_reject_files(mut self, reject_files: Vec<PathBuf>) -> Self {
        self.reject_files = reject_files;
        self
    }

    /// Whether the working tree may have been left partially modified.
    pub fn requires_manual_recovery(&self) -> bool {
        self.kind == ApplyErrorKind::Rejected
    }
}

/// Errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Edit operations could not be compiled.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A diff could not be validated or applied.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// A verification command could not be started at all.
    #[error("Failed to launch `{command}`: {reason}")]
    CommandLaunch {
        /// The command line that failed to start
        command: String,
        /// Underlying reason
        reason: String,
    },

    /// An operation exceeded its time budget.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The run was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The external generator failed.
    #[error("Generator error: {0}")]
    Generator(String),

    /// Context discovery failed.
    #[error("Context discovery failed: {0}")]
    Context(String),

    /// The work plan violates its structural rules.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether a fresh generation attempt may fix this error.
    ///
    /// Compile and validation failures, generator failures, malformed
    /// generator payloads and generator timeouts are stage-local and feed the
    /// refine loop.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Compile(_) | Self::Generator(_) | Self::Json(_) | Self::Timeout(_) => true,
            Self::Apply(apply_error) => !apply_error.requires_manual_recovery(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_compile_error_display() {
        let error = CompileError::AmbiguousAnchor {
            path: "src/a.ts".to_owned(),
            anchor: "foo()".to_owned(),
            occurrences: 2,
        };
        assert_eq!(
            error.to_string(),
            "anchor `foo()` occurs 2 times in src/a.ts; an occurrence index is required"
        );
    }

    #[test]
    fn test_apply_error_builder() {
        let error = ApplyError::new(ApplyErrorKind::HunkMismatch, "context differs")
            .with_path("src/a.ts")
            .with_hunk("@@ -1 +1 @@");
        assert_eq!(error.to_string(), "hunk mismatch: context differs");
        assert_eq!(error.path.as_deref(), Some("src/a.ts"));
        assert!(!error.requires_manual_recovery());
    }

    #[test]
    fn test_is_recoverable() {
        let compile: Error = CompileError::AnchorNotFound {
            path: "a.ts".to_owned(),
            anchor: "x".to_owned(),
        }
        .into();
        assert!(compile.is_recoverable());

        let mismatch: Error = ApplyError::new(ApplyErrorKind::HunkMismatch, "bad").into();
        assert!(mismatch.is_recoverable());

        let rejected: Error = ApplyError::new(ApplyErrorKind::Rejected, "rej").into();
        assert!(!rejected.is_recoverable());

        let launch = Error::CommandLaunch {
            command: "npm test".to_owned(),
            reason: "not found".to_owned(),
        };
        assert!(!launch.is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }
}
