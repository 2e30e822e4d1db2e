//! Unified diff parsing and in-memory hunk application.

use crate::unified::split_lines;
use patchwork_core::{ApplyError, ApplyErrorKind, PathStrip};

/// A single line in a hunk body. Text keeps its `\n` unless the diff marked
/// it as the final line without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    /// Unchanged line
    Context(String),
    /// Line removed from the old file
    Remove(String),
    /// Line added in the new file
    Add(String),
}

impl HunkLine {
    fn text_mut(&mut self) -> &mut String {
        match self {
            Self::Context(text) | Self::Remove(text) | Self::Add(text) => text,
        }
    }
}

/// One `@@` section of a file patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line in the old file (0 for an empty range)
    pub old_start: usize,
    /// Lines covered in the old file
    pub old_count: usize,
    /// 1-based first line in the new file
    pub new_start: usize,
    /// Lines covered in the new file
    pub new_count: usize,
    /// Body lines
    pub lines: Vec<HunkLine>,
    /// Original hunk text, header included, for reject files
    pub raw: String,
}

impl Hunk {
    /// Old-side lines: context and removals.
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn leading_context(&self) -> usize {
        self.lines
            .iter()
            .take_while(|line| matches!(line, HunkLine::Context(_)))
            .count()
    }

    fn trailing_context(&self) -> usize {
        self.lines
            .iter()
            .rev()
            .take_while(|line| matches!(line, HunkLine::Context(_)))
            .count()
    }
}

/// All hunks for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Dialect-stripped old path; `None` for `/dev/null`
    pub old_path: Option<String>,
    /// Dialect-stripped new path; `None` for `/dev/null`
    pub new_path: Option<String>,
    /// Hunks in file order
    pub hunks: Vec<Hunk>,
    /// `---`/`+++` header lines, for reject files
    pub header: String,
}

impl FilePatch {
    /// Path the patch operates on.
    pub fn target(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// Whether the patch creates the file.
    pub const fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    /// Whether the patch deletes the file.
    pub const fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }
}

fn malformed(reason: impl Into<String>) -> ApplyError {
    ApplyError::new(ApplyErrorKind::Malformed, reason)
}

fn parse_path(header: &str, strip: PathStrip) -> Result<Option<String>, ApplyError> {
    let raw = header.split('\t').next().unwrap_or(header).trim_end();
    if raw == "/dev/null" {
        return Ok(None);
    }
    let unquoted = raw.trim_matches('"');
    strip
        .strip(unquoted)
        .filter(|path| !path.is_empty())
        .map(|path| Some(path.to_owned()))
        .ok_or_else(|| {
            malformed(format!("cannot strip {} from path `{unquoted}`", strip.flag()))
                .with_path(unquoted)
        })
}

/// Parses a range like `10,5` or `10` into (start, count).
fn parse_range(range: &str) -> Result<(usize, usize), ApplyError> {
    let parse = |value: &str| {
        value
            .parse::<usize>()
            .map_err(|_| malformed(format!("invalid hunk range `{range}`")))
    };
    match range.split_once(',') {
        Some((start, count)) => Ok((parse(start)?, parse(count)?)),
        None => Ok((parse(range)?, 1)),
    }
}

fn parse_header(header: &str) -> Result<(usize, usize, usize, usize), ApplyError> {
    let mut parts = header.split_whitespace();
    let (Some("@@"), Some(old), Some(new)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed(format!("invalid hunk header `{header}`")));
    };
    let (Some(old), Some(new)) = (old.strip_prefix('-'), new.strip_prefix('+')) else {
        return Err(malformed(format!("invalid hunk header `{header}`")));
    };
    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Ok((old_start, old_count, new_start, new_count))
}

/// Parses every file section of a unified diff.
///
/// Hunk bodies are read according to their header counts; a body that ends
/// before its counts are satisfied is malformed. Text between sections
/// (`diff --git`, `index`, commit messages) is ignored.
///
/// # Errors
/// Returns `ApplyErrorKind::Malformed` on any structural problem.
pub fn parse_diff(text: &str, strip: PathStrip) -> Result<Vec<FilePatch>, ApplyError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];

        if let Some(old_header) = line.strip_prefix("--- ")
            && let Some(new_header) = lines.get(index + 1).and_then(|next| next.strip_prefix("+++ "))
        {
            let old_path = parse_path(old_header, strip)?;
            let new_path = parse_path(new_header, strip)?;
            if old_path.is_none() && new_path.is_none() {
                return Err(malformed("both sides of a file header are /dev/null"));
            }
            patches.push(FilePatch {
                old_path,
                new_path,
                hunks: Vec::new(),
                header: format!("{line}\n{}\n", lines[index + 1]),
            });
            index += 2;
            continue;
        }

        if line.starts_with("@@ ") {
            let Some(current) = patches.last_mut() else {
                return Err(malformed("hunk found before any file header"));
            };
            let hunk = parse_hunk(&lines, &mut index)?;
            current.hunks.push(hunk);
            continue;
        }

        index += 1;
    }

    for patch in &patches {
        if patch.hunks.is_empty() {
            return Err(
                malformed(format!("no hunks for {}", patch.target())).with_path(patch.target()),
            );
        }
    }

    Ok(patches)
}

fn parse_hunk(lines: &[&str], index: &mut usize) -> Result<Hunk, ApplyError> {
    let header = lines[*index];
    let (old_start, old_count, new_start, new_count) = parse_header(header)?;
    let mut raw = format!("{header}\n");
    let mut body: Vec<HunkLine> = Vec::new();
    let mut old_remaining = old_count;
    let mut new_remaining = new_count;
    *index += 1;

    while *index < lines.len() {
        let line = lines[*index];

        if line.starts_with('\\') {
            if let Some(last) = body.last_mut() {
                let text = last.text_mut();
                if text.ends_with('\n') {
                    text.pop();
                }
            }
            raw.push_str(line);
            raw.push('\n');
            *index += 1;
            continue;
        }

        if old_remaining == 0 && new_remaining == 0 {
            break;
        }

        let parsed = match line.chars().next() {
            Some(' ') | None => {
                if old_remaining == 0 || new_remaining == 0 {
                    return Err(malformed(format!("hunk body exceeds header `{header}`")));
                }
                old_remaining -= 1;
                new_remaining -= 1;
                HunkLine::Context(format!("{}\n", line.get(1..).unwrap_or_default()))
            }
            Some('-') => {
                if old_remaining == 0 {
                    return Err(malformed(format!("hunk body exceeds header `{header}`")));
                }
                old_remaining -= 1;
                HunkLine::Remove(format!("{}\n", &line[1..]))
            }
            Some('+') => {
                if new_remaining == 0 {
                    return Err(malformed(format!("hunk body exceeds header `{header}`")));
                }
                new_remaining -= 1;
                HunkLine::Add(format!("{}\n", &line[1..]))
            }
            Some(_) => break,
        };
        raw.push_str(line);
        raw.push('\n');
        body.push(parsed);
        *index += 1;
    }

    if old_remaining != 0 || new_remaining != 0 {
        return Err(malformed(format!(
            "hunk `{header}` ends early ({old_remaining} old and {new_remaining} new lines missing)"
        ))
        .with_hunk(raw));
    }

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: body,
        raw,
    })
}

/// Result of applying a file's hunks to its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkApplication {
    /// Content with every applicable hunk applied
    pub content: String,
    /// Indices of hunks that could not be placed
    pub rejected: Vec<usize>,
}

fn same_ignoring_trailing_ws(left: &str, right: &str) -> bool {
    left.trim_end() == right.trim_end()
}

fn strip_trailing_ws(line: &str) -> String {
    let trimmed = line.trim_end();
    if line.ends_with('\n') {
        format!("{trimmed}\n")
    } else {
        trimmed.to_owned()
    }
}

fn matches_at(file: &[&str], pattern: &[&str], position: usize) -> bool {
    position + pattern.len() <= file.len()
        && pattern
            .iter()
            .zip(&file[position..])
            .all(|(expected, actual)| same_ignoring_trailing_ws(expected, actual))
}

/// Finds where a hunk's old side sits in `file`, no earlier than `floor`.
///
/// Hunks without leading context that start at line 1 must match at the top;
/// hunks without trailing context must match at the end of the file.
/// Otherwise the search moves outward from `expected`.
fn locate(
    file: &[&str],
    hunk: &Hunk,
    pattern: &[&str],
    expected: usize,
    floor: usize,
) -> Option<usize> {
    let match_beginning = hunk.leading_context() == 0 && hunk.old_start <= 1;
    let match_end = hunk.trailing_context() == 0;

    if pattern.len() > file.len() {
        return None;
    }
    let last_start = file.len() - pattern.len();

    let acceptable = |position: usize| {
        position >= floor
            && (!match_beginning || position == 0)
            && (!match_end || position == last_start)
            && matches_at(file, pattern, position)
    };

    if match_beginning {
        return acceptable(0).then_some(0);
    }
    if match_end {
        return acceptable(last_start).then_some(last_start);
    }

    let expected = expected.clamp(floor.min(last_start), last_start);
    for distance in 0..=file.len() {
        let before = expected.checked_sub(distance);
        let after = expected + distance;
        if before.is_none() && after > last_start {
            break;
        }
        if let Some(position) = before
            && acceptable(position)
        {
            return Some(position);
        }
        if distance > 0 && after <= last_start && acceptable(after) {
            return Some(after);
        }
    }
    None
}

fn push_output(out: &mut String, line: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
}

/// Applies hunks in order to `content`, skipping any that cannot be placed.
///
/// Context is compared ignoring trailing whitespace and copied from the
/// original file; added lines have trailing whitespace stripped.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> HunkApplication {
    let file = split_lines(content);
    let mut out = String::with_capacity(content.len());
    let mut rejected = Vec::new();
    let mut cursor = 0;
    let mut drift: isize = 0;

    for (hunk_index, hunk) in hunks.iter().enumerate() {
        let pattern = hunk.old_side();
        let declared = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (declared as isize + drift).max(0) as usize;

        let Some(position) = locate(&file, hunk, &pattern, expected, cursor) else {
            rejected.push(hunk_index);
            continue;
        };

        for line in &file[cursor..position] {
            push_output(&mut out, line);
        }
        let mut old_index = position;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(_) => {
                    push_output(&mut out, file[old_index]);
                    old_index += 1;
                }
                HunkLine::Remove(_) => old_index += 1,
                HunkLine::Add(text) => push_output(&mut out, &strip_trailing_ws(text)),
            }
        }
        cursor = old_index;
        drift = position as isize - declared as isize;
    }

    for line in &file[cursor..] {
        push_output(&mut out, line);
    }

    HunkApplication {
        content: out,
        rejected,
    }
}

/// Renders the reject file body for the given hunks of a patch.
pub fn render_rejects(patch: &FilePatch, rejected: &[usize]) -> String {
    let mut text = patch.header.clone();
    for hunk_index in rejected {
        if let Some(hunk) = patch.hunks.get(*hunk_index) {
            text.push_str(&hunk.raw);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> FilePatch {
        match parse_diff(text, PathStrip::P1) {
            Ok(mut patches) if patches.len() == 1 => patches.remove(0),
            Ok(patches) => panic!("expected one patch, got {}", patches.len()),
            Err(error) => panic!("parse failed: {error}"),
        }
    }

    #[test]
    fn test_parse_multi_file() {
        let text = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
 keep
-old
+new
--- /dev/null
+++ b/b.txt
@@ -0,0 +1 @@
+hello
";
        let patches = match parse_diff(text, PathStrip::P1) {
            Ok(patches) => patches,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].target(), "a.txt");
        assert!(patches[1].is_creation());
        assert_eq!(patches[1].hunks[0].lines, vec![HunkLine::Add("hello\n".to_owned())]);
    }

    #[test]
    fn test_short_hunk_is_malformed() {
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n keep\n-old\n+new\n";
        let error = match parse_diff(text, PathStrip::P1) {
            Ok(_) => panic!("expected malformed diff"),
            Err(error) => error,
        };
        assert_eq!(error.kind, ApplyErrorKind::Malformed);
    }

    #[test]
    fn test_no_newline_marker_strips_terminator() {
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-old\n\\ No newline at end of file\n+new\n";
        let patch = parse_one(text);
        assert_eq!(patch.hunks[0].lines[0], HunkLine::Remove("old".to_owned()));
        let applied = apply_hunks("old", &patch.hunks);
        assert_eq!(applied.content, "new\n");
        assert!(applied.rejected.is_empty());
    }

    #[test]
    fn test_apply_with_drift_and_trailing_whitespace() {
        let text = "\
--- a/f.txt
+++ b/f.txt
@@ -2,3 +2,3 @@
 b
-c
+C
 d
";
        let patch = parse_one(text);
        let applied = apply_hunks("x\ny\na\nb  \nc\nd\ne\n", &patch.hunks);
        assert!(applied.rejected.is_empty());
        assert_eq!(applied.content, "x\ny\na\nb  \nC\nd\ne\n");
    }

    #[test]
    fn test_mismatched_hunk_is_rejected() {
        let text = "--- a/f.txt\n+++ b/f.txt\n@@ -1,2 +1,2 @@\n a\n-zzz\n+b\n";
        let patch = parse_one(text);
        let applied = apply_hunks("a\nb\n", &patch.hunks);
        assert_eq!(applied.rejected, vec![0]);
        assert_eq!(applied.content, "a\nb\n");
        assert!(render_rejects(&patch, &applied.rejected).contains("-zzz"));
    }

    #[test]
    fn test_no_trailing_context_anchors_at_end() {
        let text = "--- a/f.txt\n+++ b/f.txt\n@@ -2,1 +2,2 @@\n b\n+c\n";
        let patch = parse_one(text);
        let at_end = apply_hunks("a\nb\n", &patch.hunks);
        assert_eq!(at_end.content, "a\nb\nc\n");
        let not_at_end = apply_hunks("a\nb\nz\n", &patch.hunks);
        assert_eq!(not_at_end.rejected, vec![0]);
    }
}
