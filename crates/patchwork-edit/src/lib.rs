//! Structured edits and unified diffs.
//!
//! Compiles anchor-addressed [`PatchOps`](patchwork_core::PatchOps) into
//! unified diffs, and validates and applies diffs against a working tree.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Test allows"
    )
)]

/// Literal anchor lookup and classification.
pub mod anchor;
/// Dry-run validation and application of diffs.
pub mod apply;
/// Edit operation compiler.
pub mod compiler;
/// Unified diff parsing and hunk placement.
pub mod patch;
/// Repository path containment.
pub mod paths;
/// In-memory file snapshots.
pub mod snapshot;
/// Line diffing and unified diff rendering.
pub mod unified;

pub use anchor::locate_anchors;
pub use apply::{AppliedPatch, DiffApplier, RepoLocks};
pub use compiler::EditCompiler;
pub use patch::{FilePatch, Hunk, HunkLine, parse_diff};
pub use paths::{is_safe_relative, normalize_relative, resolve_in_repo};
pub use snapshot::FileSnapshot;
pub use unified::render_file_diff;
