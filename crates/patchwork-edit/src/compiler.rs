//! Compiles anchor-addressed edit operations into a unified diff.

use crate::anchor::{classify, find_occurrences, line_end, line_of_offset, line_start};
use crate::snapshot::FileSnapshot;
use crate::unified::render_file_diff;
use patchwork_core::{CompileError, Diff, EditOp, PatchOps, PathStrip};
use regex::Regex;
use tracing::debug;

/// Turns [`PatchOps`] into a [`Diff`] against a [`FileSnapshot`].
///
/// Compilation is pure: it never touches the filesystem, and the same
/// operations over the same snapshot always produce the same diff.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditCompiler {
    dialect: PathStrip,
}

impl EditCompiler {
    /// Creates a compiler that emits headers in the given dialect.
    pub const fn new(dialect: PathStrip) -> Self {
        Self { dialect }
    }

    /// Path dialect of emitted diffs.
    pub const fn dialect(&self) -> PathStrip {
        self.dialect
    }

    /// Applies every operation in order and returns the edited snapshot.
    ///
    /// Files missing from the snapshot start empty and are created.
    ///
    /// # Errors
    /// Returns a [`CompileError`] for the first operation whose anchors do not
    /// resolve.
    pub fn apply_in_memory(
        &self,
        ops: &PatchOps,
        snapshot: &FileSnapshot,
    ) -> Result<FileSnapshot, CompileError> {
        let mut edited = snapshot.clone();
        for op in &ops.ops {
            let path = op.path();
            let current = edited.get(path).unwrap_or_default();
            let updated = apply_op(op, current)?;
            debug!("Applied {} to {path}", op.name());
            edited.insert(path, updated);
        }
        Ok(edited)
    }

    /// Compiles operations into one diff section per changed file.
    ///
    /// Sections follow first-touch order. Unchanged files produce nothing, so
    /// operations that are all no-ops yield the empty diff.
    ///
    /// # Errors
    /// Returns a [`CompileError`] if any anchor fails to resolve; no diff is
    /// produced in that case.
    pub fn compile(&self, ops: &PatchOps, snapshot: &FileSnapshot) -> Result<Diff, CompileError> {
        let edited = self.apply_in_memory(ops, snapshot)?;
        let mut text = String::new();

        for path in ops.touched_paths() {
            let after = edited.get(path).unwrap_or_default();
            if let Some(section) = render_file_diff(path, snapshot.get(path), after, self.dialect) {
                text.push_str(&section);
            }
        }

        debug!(
            "Compiled {} ops into {} bytes of diff",
            ops.ops.len(),
            text.len()
        );
        Ok(Diff::new(text, self.dialect))
    }
}

/// Code as whole lines: empty stays empty, otherwise it ends with `\n`.
fn as_lines(code: &str) -> String {
    if code.is_empty() || code.ends_with('\n') {
        code.to_owned()
    } else {
        format!("{code}\n")
    }
}

fn splice(content: &str, at: usize, code: &str) -> String {
    let (head, tail) = content.split_at(at);
    let mut result = String::with_capacity(content.len() + code.len() + 1);
    result.push_str(head);
    if !head.is_empty() && !head.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&as_lines(code));
    result.push_str(tail);
    result
}

/// Selects one occurrence of `anchor`, honouring the 1-based `occurrence`.
fn select_occurrence(
    path: &str,
    content: &str,
    anchor: &str,
    occurrence: Option<usize>,
) -> Result<usize, CompileError> {
    let offsets = find_occurrences(content, anchor);
    let not_found = || CompileError::AnchorNotFound {
        path: path.to_owned(),
        anchor: anchor.to_owned(),
    };

    let selected = match occurrence {
        Some(index) => index
            .checked_sub(1)
            .and_then(|zero_based| offsets.get(zero_based))
            .copied()
            .ok_or_else(not_found)?,
        None => match offsets.as_slice() {
            [] => return Err(not_found()),
            [only] => *only,
            many => {
                return Err(CompileError::AmbiguousAnchor {
                    path: path.to_owned(),
                    anchor: anchor.to_owned(),
                    occurrences: many.len(),
                });
            }
        },
    };

    debug!(
        "Anchor `{anchor}` ({:?}) resolved to {path}:{}",
        classify(anchor),
        line_of_offset(content, selected)
    );
    Ok(selected)
}

fn apply_op(op: &EditOp, content: &str) -> Result<String, CompileError> {
    match op {
        EditOp::InsertAfter {
            path,
            anchor,
            code,
            occurrence,
        } => {
            let offset = select_occurrence(path, content, anchor, *occurrence)?;
            let at = line_end(content, offset + anchor.len());
            Ok(splice(content, at, code))
        }
        EditOp::InsertBefore {
            path,
            anchor,
            code,
            occurrence,
        } => {
            let offset = select_occurrence(path, content, anchor, *occurrence)?;
            let at = line_start(content, offset);
            Ok(splice(content, at, code))
        }
        EditOp::ReplaceBetween {
            path,
            start,
            end,
            code,
        } => replace_between(path, content, start, end, code),
        EditOp::AppendIfMissing { code, guard, .. } => {
            let marker = if guard.is_empty() { code } else { guard };
            if content.contains(marker.as_str()) {
                return Ok(content.to_owned());
            }
            Ok(splice(content, content.len(), code))
        }
        EditOp::UpsertImport { spec, from, .. } => Ok(upsert_import(content, spec, from)),
    }
}

fn replace_between(
    path: &str,
    content: &str,
    start: &str,
    end: &str,
    code: &str,
) -> Result<String, CompileError> {
    let start_offset = select_occurrence(path, content, start, None)?;
    let end_offset = select_occurrence(path, content, end, None)?;

    if end_offset < start_offset + start.len() {
        return Err(CompileError::InvalidRange {
            path: path.to_owned(),
            start: start.to_owned(),
            end: end.to_owned(),
        });
    }

    let span_start = line_start(content, start_offset);
    let span_end = line_end(content, end_offset + end.len());
    let mut result = String::with_capacity(content.len() + code.len());
    result.push_str(&content[..span_start]);
    result.push_str(&as_lines(code));
    result.push_str(&content[span_end..]);
    Ok(result)
}

/// Names inside an import specifier, ignoring braces, whitespace and order.
fn specifier_names(spec: &str) -> Vec<String> {
    let mut names: Vec<String> = spec
        .split(|ch: char| ch == ',' || ch == '{' || ch == '}')
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names
}

fn has_import(content: &str, spec: &str, from: &str) -> bool {
    let pattern = format!(
        r#"(?m)^\s*import\s+(?:type\s+)?([^;]+?)\s+from\s+['"]{}['"]"#,
        regex::escape(from)
    );
    let Ok(import_re) = Regex::new(&pattern) else {
        return false;
    };
    let wanted = specifier_names(spec);
    import_re.captures_iter(content).any(|captures| {
        let existing = captures
            .get(1)
            .map(|specifier| specifier_names(specifier.as_str()))
            .unwrap_or_default();
        wanted.iter().all(|name| existing.contains(name))
    })
}

/// Byte offset just past the last import statement, if there is one.
fn end_of_imports(content: &str) -> Option<usize> {
    let mut offset = 0;
    let mut in_import = false;
    let mut last_end = None;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("import ") || trimmed.starts_with("import{") {
            in_import = true;
        }
        offset += line.len();
        if in_import
            && (trimmed.ends_with(';')
                || trimmed.contains(" from ")
                || trimmed.starts_with("from ")
                || trimmed.starts_with("import '")
                || trimmed.starts_with("import \""))
        {
            in_import = false;
            last_end = Some(offset);
        }
    }

    last_end
}

fn upsert_import(content: &str, spec: &str, from: &str) -> String {
    if has_import(content, spec, from) {
        return content.to_owned();
    }
    let statement = format!("import {spec} from '{from}';");
    let at = end_of_imports(content).unwrap_or_else(|| {
        if content.starts_with("#!") {
            line_end(content, 1)
        } else {
            0
        }
    });
    splice(content, at, &statement)
}
