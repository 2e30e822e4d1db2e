//! Line diffing and unified diff rendering.

use core::ops::Range;
use patchwork_core::PathStrip;

/// Context lines kept around each change.
pub const CONTEXT_LINES: usize = 3;

/// Marker emitted after a line that has no terminating newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Splits content into lines that keep their `\n` terminator.
///
/// Only the final line may lack one. Empty content has no lines.
pub fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

/// One step of an edit script between two line sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEdit {
    /// Line kept (old index, new index)
    Equal(usize, usize),
    /// Old line removed
    Delete(usize),
    /// New line inserted
    Insert(usize),
}

impl LineEdit {
    const fn is_equal(self) -> bool {
        matches!(self, Self::Equal(..))
    }
}

/// Computes a shortest edit script with Myers' algorithm.
///
/// Common prefix and suffix are trimmed first so the search only covers the
/// changed middle.
pub fn diff_lines(old: &[&str], new: &[&str]) -> Vec<LineEdit> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(left, right)| left == right)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(left, right)| left == right)
        .count();

    let old_middle = &old[prefix..old.len() - suffix];
    let new_middle = &new[prefix..new.len() - suffix];

    let mut edits: Vec<LineEdit> = (0..prefix).map(|index| LineEdit::Equal(index, index)).collect();
    edits.extend(
        myers(old_middle, new_middle)
            .into_iter()
            .map(|edit| match edit {
                LineEdit::Equal(old_index, new_index) => {
                    LineEdit::Equal(old_index + prefix, new_index + prefix)
                }
                LineEdit::Delete(old_index) => LineEdit::Delete(old_index + prefix),
                LineEdit::Insert(new_index) => LineEdit::Insert(new_index + prefix),
            }),
    );
    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    edits.extend((0..suffix).map(|offset| LineEdit::Equal(old_tail + offset, new_tail + offset)));
    edits
}

fn myers(old: &[&str], new: &[&str]) -> Vec<LineEdit> {
    let old_len = old.len() as isize;
    let new_len = new.len() as isize;
    let max = old_len + new_len;
    if max == 0 {
        return Vec::new();
    }

    let offset = max + 1;
    let slot = |diagonal: isize| (diagonal + offset) as usize;
    let mut frontier = vec![0_isize; (2 * max + 3) as usize];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for depth in 0..=max {
        trace.push(frontier.clone());
        let mut diagonal = -depth;
        while diagonal <= depth {
            let mut old_pos = if diagonal == -depth
                || (diagonal != depth
                    && frontier[slot(diagonal - 1)] < frontier[slot(diagonal + 1)])
            {
                frontier[slot(diagonal + 1)]
            } else {
                frontier[slot(diagonal - 1)] + 1
            };
            let mut new_pos = old_pos - diagonal;
            while old_pos < old_len
                && new_pos < new_len
                && old[old_pos as usize] == new[new_pos as usize]
            {
                old_pos += 1;
                new_pos += 1;
            }
            frontier[slot(diagonal)] = old_pos;
            if old_pos >= old_len && new_pos >= new_len {
                break 'search;
            }
            diagonal += 2;
        }
    }

    let mut edits = Vec::new();
    let mut old_pos = old_len;
    let mut new_pos = new_len;

    for (depth, snapshot) in trace.iter().enumerate().rev() {
        let depth = depth as isize;
        let diagonal = old_pos - new_pos;
        let previous_diagonal = if diagonal == -depth
            || (diagonal != depth
                && snapshot[slot(diagonal - 1)] < snapshot[slot(diagonal + 1)])
        {
            diagonal + 1
        } else {
            diagonal - 1
        };
        let previous_old = snapshot[slot(previous_diagonal)];
        let previous_new = previous_old - previous_diagonal;

        while old_pos > previous_old && new_pos > previous_new {
            old_pos -= 1;
            new_pos -= 1;
            edits.push(LineEdit::Equal(old_pos as usize, new_pos as usize));
        }

        if depth > 0 {
            if old_pos == previous_old {
                edits.push(LineEdit::Insert((new_pos - 1) as usize));
            } else {
                edits.push(LineEdit::Delete((old_pos - 1) as usize));
            }
        }

        old_pos = previous_old;
        new_pos = previous_new;
    }

    edits.reverse();
    edits
}

/// Groups an edit script into hunk ranges with `context` lines on each side.
fn hunk_ranges(edits: &[LineEdit], context: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = 0;

    while let Some(first) = (cursor..edits.len()).find(|index| !edits[*index].is_equal()) {
        let mut last = first;
        while let Some(next) = (last + 1..edits.len()).find(|index| !edits[*index].is_equal()) {
            if next - last - 1 > 2 * context {
                break;
            }
            last = next;
        }
        let start = first.saturating_sub(context).max(cursor);
        let end = (last + 1 + context).min(edits.len());
        ranges.push(start..end);
        cursor = end;
    }

    ranges
}

fn push_line(out: &mut String, prefix: char, line: &str) {
    out.push(prefix);
    match line.strip_suffix('\n') {
        Some(body) => {
            out.push_str(body);
            out.push('\n');
        }
        None => {
            out.push_str(line);
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

fn header_path(path: &str, side: &str, dialect: PathStrip) -> String {
    match dialect {
        PathStrip::P0 => path.to_owned(),
        PathStrip::P1 => format!("{side}/{path}"),
    }
}

fn hunk_start(before: usize, count: usize) -> usize {
    if count == 0 { before } else { before + 1 }
}

/// Renders one file's unified diff section, or `None` when nothing changed.
///
/// `before` is `None` for a file being created.
pub fn render_file_diff(
    path: &str,
    before: Option<&str>,
    after: &str,
    dialect: PathStrip,
) -> Option<String> {
    let old_text = before.unwrap_or("");
    if before.is_some() && old_text == after {
        return None;
    }
    if before.is_none() && after.is_empty() {
        return None;
    }

    let old_lines = split_lines(old_text);
    let new_lines = split_lines(after);
    let edits = diff_lines(&old_lines, &new_lines);

    let mut out = String::new();
    let old_header = if before.is_some() {
        header_path(path, "a", dialect)
    } else {
        "/dev/null".to_owned()
    };
    out.push_str(&format!("--- {old_header}\n"));
    out.push_str(&format!("+++ {}\n", header_path(path, "b", dialect)));

    for range in hunk_ranges(&edits, CONTEXT_LINES) {
        let hunk = &edits[range];
        let old_before = hunk
            .iter()
            .find_map(|edit| match edit {
                LineEdit::Equal(old_index, _) | LineEdit::Delete(old_index) => Some(*old_index),
                LineEdit::Insert(_) => None,
            })
            .unwrap_or_else(|| old_position_before(&edits, hunk));
        let new_before = hunk
            .iter()
            .find_map(|edit| match edit {
                LineEdit::Equal(_, new_index) | LineEdit::Insert(new_index) => Some(*new_index),
                LineEdit::Delete(_) => None,
            })
            .unwrap_or(0);
        let old_count = hunk
            .iter()
            .filter(|edit| !matches!(edit, LineEdit::Insert(_)))
            .count();
        let new_count = hunk
            .iter()
            .filter(|edit| !matches!(edit, LineEdit::Delete(_)))
            .count();

        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk_start(old_before, old_count),
            old_count,
            hunk_start(new_before, new_count),
            new_count
        ));

        for edit in hunk {
            match *edit {
                LineEdit::Equal(old_index, _) => push_line(&mut out, ' ', old_lines[old_index]),
                LineEdit::Delete(old_index) => push_line(&mut out, '-', old_lines[old_index]),
                LineEdit::Insert(new_index) => push_line(&mut out, '+', new_lines[new_index]),
            }
        }
    }

    Some(out)
}

/// Old-file position of a hunk made only of insertions.
fn old_position_before(edits: &[LineEdit], hunk: &[LineEdit]) -> usize {
    let Some(LineEdit::Insert(first_new)) = hunk.first() else {
        return 0;
    };
    edits
        .iter()
        .take_while(|edit| !matches!(edit, LineEdit::Insert(new_index) if new_index == first_new))
        .filter(|edit| !matches!(edit, LineEdit::Insert(_)))
        .count()
}
