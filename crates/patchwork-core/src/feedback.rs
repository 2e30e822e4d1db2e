//! Feedback accumulated across attempts and handed back to the generator.

use crate::diagnostics::Diagnostics;
use crate::diff::Diff;
use serde::{Deserialize, Serialize};

/// Bytes of each failing command's output kept in rendered feedback.
const DIAGNOSTIC_EXCERPT_BYTES: usize = 4000;

/// Everything the next attempt should know about the previous ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Attempt this feedback follows
    pub attempt: usize,
    /// Compile, apply, generator and judge issues
    pub issues: Vec<String>,
    /// Diagnostics from failing commands
    pub diagnostics: Vec<Diagnostics>,
    /// Diff produced by the previous attempt
    pub previous_diff: Option<Diff>,
}

impl Feedback {
    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.diagnostics.is_empty()
    }

    /// Records a free-form issue.
    pub fn push_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    /// Records failing diagnostics; passing and skipped runs are ignored.
    pub fn push_diagnostics<'diag>(
        &mut self,
        diagnostics: impl IntoIterator<Item = &'diag Diagnostics>,
    ) {
        self.diagnostics.extend(
            diagnostics
                .into_iter()
                .filter(|diagnostic| !diagnostic.passed())
                .cloned(),
        );
    }

    /// Records the diff the last attempt produced.
    pub fn set_previous_diff(&mut self, diff: Diff) {
        self.previous_diff = Some(diff);
    }

    /// Builds the refinement context text.
    pub fn render(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("Attempt {} did not pass.\n", self.attempt));

        if !self.issues.is_empty() {
            text.push_str("\nISSUES:\n");
            for (index, issue) in self.issues.iter().enumerate() {
                text.push_str(&format!("{}. {issue}\n", index + 1));
            }
        }

        for diagnostic in &self.diagnostics {
            text.push_str(&format!("\n{} OUTPUT:\n", diagnostic.summary().to_uppercase()));
            text.push_str(truncate(&diagnostic.output, DIAGNOSTIC_EXCERPT_BYTES));
            if !text.ends_with('\n') {
                text.push('\n');
            }
        }

        if let Some(diff) = self.previous_diff.as_ref().filter(|diff| !diff.is_empty()) {
            text.push_str("\nPREVIOUS DIFF:\n");
            text.push_str(diff.text());
            if !text.ends_with('\n') {
                text.push('\n');
            }
        }

        text.push_str("\nFix only what the issues above require. Keep all other code unchanged.\n");
        text
    }
}

/// Cuts `text` to at most `max_bytes`, on a char boundary.
pub fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CommandKey;
    use crate::diff::PathStrip;

    #[test]
    fn test_render_includes_all_sections() {
        let mut feedback = Feedback {
            attempt: 2,
            ..Feedback::default()
        };
        feedback.push_issue("anchor `foo` not found in src/a.ts");
        feedback.push_diagnostics(&[
            Diagnostics::completed(CommandKey::Lint, 1, "src/a.ts:3 unused variable"),
            Diagnostics::skipped(CommandKey::Test),
        ]);
        feedback.set_previous_diff(Diff::new("--- a/x\n+++ b/x\n", PathStrip::P1));

        let text = feedback.render();
        assert!(text.starts_with("Attempt 2 did not pass."));
        assert!(text.contains("1. anchor `foo` not found"));
        assert!(text.contains("LINT: FAILED (EXIT 1) OUTPUT:"));
        assert!(text.contains("unused variable"));
        assert!(!text.contains("TEST"));
        assert!(text.contains("PREVIOUS DIFF:\n--- a/x"));
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
