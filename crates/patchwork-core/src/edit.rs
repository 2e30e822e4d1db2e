//! Anchor-addressed edit operations produced by a generator.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Syntactic category of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    /// Class declaration
    Class,
    /// Method declaration
    Method,
    /// Free function declaration
    Function,
    /// `case` label in a switch
    SwitchCase,
    /// Import statement
    Import,
    /// Marked region
    Region,
    /// Anything else
    #[default]
    Custom,
}

/// A resolved location in a file. Advisory only; edits address anchors by text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Literal anchor text
    pub text: String,
    /// Category
    pub kind: AnchorKind,
    /// 1-based line the anchor starts on
    pub line: usize,
}

/// A single structured edit. Matched exhaustively by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditOp {
    /// Insert `code` as whole lines after the line holding the anchor.
    InsertAfter {
        /// Target file, relative to the repository root
        path: String,
        /// Literal anchor text
        anchor: String,
        /// Code to insert
        code: String,
        /// 1-based occurrence of the anchor; required when it is not unique
        #[serde(default, alias = "occur")]
        occurrence: Option<usize>,
    },
    /// Insert `code` as whole lines before the line holding the anchor.
    InsertBefore {
        /// Target file, relative to the repository root
        path: String,
        /// Literal anchor text
        anchor: String,
        /// Code to insert
        code: String,
        /// 1-based occurrence of the anchor; required when it is not unique
        #[serde(default, alias = "occur")]
        occurrence: Option<usize>,
    },
    /// Replace the inclusive line span from `start` to `end` with `code`.
    ReplaceBetween {
        /// Target file, relative to the repository root
        path: String,
        /// Start anchor text
        start: String,
        /// End anchor text
        end: String,
        /// Replacement code
        code: String,
    },
    /// Append `code` unless `guard` already occurs in the file.
    AppendIfMissing {
        /// Target file, relative to the repository root
        path: String,
        /// Code to append
        code: String,
        /// Substring whose presence makes the op a no-op
        #[serde(alias = "must_contain", alias = "mustContain")]
        guard: String,
    },
    /// Add `import {spec} from '{from}';` unless it is already present.
    UpsertImport {
        /// Target file, relative to the repository root
        path: String,
        /// Import specifier, e.g. `{ fetchJson }`
        spec: String,
        /// Module the specifier is imported from
        from: String,
    },
}

impl EditOp {
    /// Target file of the operation.
    pub fn path(&self) -> &str {
        match self {
            Self::InsertAfter { path, .. }
            | Self::InsertBefore { path, .. }
            | Self::ReplaceBetween { path, .. }
            | Self::AppendIfMissing { path, .. }
            | Self::UpsertImport { path, .. } => path,
        }
    }

    /// Short operation name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InsertAfter { .. } => "insert_after",
            Self::InsertBefore { .. } => "insert_before",
            Self::ReplaceBetween { .. } => "replace_between",
            Self::AppendIfMissing { .. } => "append_if_missing",
            Self::UpsertImport { .. } => "upsert_import",
        }
    }
}

/// An ordered list of edits; order is application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOps {
    /// Operations in application order
    pub ops: Vec<EditOp>,
}

impl PatchOps {
    /// Wraps a list of operations.
    pub fn new(ops: Vec<EditOp>) -> Self {
        Self { ops }
    }

    /// Parses the generator's `{"ops": [...]}` payload.
    ///
    /// # Errors
    /// Returns an error if the text is not valid JSON of that shape.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether there are no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Files touched by the operations, in first-touch order.
    pub fn touched_paths(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .map(EditOp::path)
            .filter(|path| seen.insert(*path))
            .collect()
    }
}
