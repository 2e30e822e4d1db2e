//! Quality judge: scores a diff on static signals and contract conformance.

use crate::conformance::{ForbiddenPatterns, check_containers, check_layout, check_naming};
use crate::typescan::{SourceFacts, is_scannable, scan};
use core::fmt;
use patchwork_core::{Diagnostics, Diff, JudgeConfig, PatternContract};
use patchwork_edit::patch::HunkLine;
use patchwork_edit::{FileSnapshot, parse_diff};
use std::collections::HashMap;
use tracing::debug;

/// Highest possible score.
pub const MAX_SCORE: u32 = 100;

/// Category of a judge finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Introduced `any` type annotations
    EscapeType,
    /// File outside the expected layout
    Layout,
    /// Declared container missing
    Container,
    /// Methods declared in the wrong style
    MethodStyle,
    /// Identifier or file name casing
    Naming,
    /// Forbidden pattern in added code
    Forbidden,
    /// Post-patch source does not parse
    Syntax,
    /// A verification command failed
    Verification,
    /// The diff does not apply to the pre-patch snapshot
    Patch,
}

impl ViolationKind {
    /// Whether this finding rejects regardless of score.
    pub const fn is_hard(self) -> bool {
        matches!(self, Self::Verification | Self::Patch)
    }

    /// Stable name for logs and feedback.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EscapeType => "escape_type",
            Self::Layout => "layout",
            Self::Container => "container",
            Self::MethodStyle => "method_style",
            Self::Naming => "naming",
            Self::Forbidden => "forbidden",
            Self::Syntax => "syntax",
            Self::Verification => "verification",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One judge finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Category
    pub kind: ViolationKind,
    /// File the finding is about, if any
    pub path: Option<String>,
    /// Human-readable detail
    pub message: String,
}

impl Violation {
    /// Creates a finding without a path.
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            message: message.into(),
        }
    }

    /// Attaches the file the finding is about.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(formatter, "[{}] {path}: {}", self.kind, self.message),
            None => write!(formatter, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Judge verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    /// 0-100
    pub value: u32,
    /// No hard failure and `value` at or above the threshold
    pub accepted: bool,
    /// `any` annotations introduced by the diff
    pub escape_types: usize,
    /// Findings
    pub violations: Vec<Violation>,
}

impl Score {
    /// Whether a hard failure was found.
    pub fn hard_failed(&self) -> bool {
        self.violations.iter().any(|violation| violation.kind.is_hard())
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let verdict = if self.accepted { "accepted" } else { "rejected" };
        format!(
            "score {}/{MAX_SCORE} {verdict} ({} violation(s))",
            self.value,
            self.violations.len()
        )
    }
}

/// Scores candidate diffs against a pattern contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityJudge {
    config: JudgeConfig,
}

fn scans_language(language: &str) -> bool {
    matches!(
        language.to_ascii_lowercase().as_str(),
        "ts" | "tsx" | "typescript" | "js" | "jsx" | "javascript"
    )
}

fn added_lines_by_file(diff: &Diff) -> HashMap<String, Vec<String>> {
    let mut added: HashMap<String, Vec<String>> = HashMap::new();
    let Ok(patches) = parse_diff(diff.text(), diff.dialect()) else {
        return added;
    };
    for patch in patches {
        let lines = added.entry(patch.target().to_owned()).or_default();
        for hunk in patch.hunks {
            lines.extend(hunk.lines.into_iter().filter_map(|line| match line {
                HunkLine::Add(text) => Some(text),
                HunkLine::Context(_) | HunkLine::Remove(_) => None,
            }));
        }
    }
    added
}

impl QualityJudge {
    /// Creates a judge with the given weights.
    pub const fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Scoring weights in use.
    pub const fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Scores `diff` applied to `pre`, given the verification results.
    ///
    /// `pre` must hold the pre-patch content of every file the diff touches;
    /// the post-patch tree is rebuilt from it in memory.
    pub fn judge(
        &self,
        diff: &Diff,
        contract: &PatternContract,
        diagnostics: &[Diagnostics],
        pre: &FileSnapshot,
    ) -> Score {
        let mut violations: Vec<Violation> = diagnostics
            .iter()
            .filter(|result| !result.passed())
            .map(|result| Violation::new(ViolationKind::Verification, result.summary()))
            .collect();

        let post = match pre.apply_diff(diff) {
            Ok(post) => post,
            Err(error) => {
                violations.push(Violation::new(ViolationKind::Patch, error.to_string()));
                return self.score(violations, 0);
            }
        };

        let added = added_lines_by_file(diff);
        let forbidden = ForbiddenPatterns::new(contract);
        let analyse = scans_language(&contract.language);
        let mut escape_types = 0;

        for path in diff.touched_paths() {
            if let Some(lines) = added.get(&path) {
                violations.extend(forbidden.check(&path, lines));
            }
            let Some(source) = post.get(&path) else {
                continue;
            };
            if !is_scannable(&path) {
                continue;
            }
            if let Some(violation) = check_layout(&contract.layout, &path) {
                violations.push(violation);
            }
            if !analyse {
                continue;
            }

            let post_facts = match scan(&path, source) {
                Ok(facts) => facts,
                Err(message) => {
                    violations.push(
                        Violation::new(ViolationKind::Syntax, format!("does not parse: {message}"))
                            .with_path(path.as_str()),
                    );
                    continue;
                }
            };
            let pre_facts: Option<SourceFacts> = pre
                .get(&path)
                .map(|content| scan(&path, content).unwrap_or_default());

            let introduced = post_facts
                .any_count
                .saturating_sub(pre_facts.as_ref().map_or(0, |facts| facts.any_count));
            if introduced > 0 {
                escape_types += introduced;
                violations.push(
                    Violation::new(
                        ViolationKind::EscapeType,
                        format!("{introduced} `any` annotation(s) introduced"),
                    )
                    .with_path(path.as_str()),
                );
            }
            violations.extend(check_containers(contract, &path, pre_facts.as_ref(), &post_facts));
            violations.extend(check_naming(contract, &path, pre_facts.as_ref(), &post_facts));
        }

        let score = self.score(violations, escape_types);
        debug!("Judge: {}", score.summary());
        score
    }

    fn score(&self, violations: Vec<Violation>, escape_types: usize) -> Score {
        let penalised = violations
            .iter()
            .filter(|violation| {
                !violation.kind.is_hard() && violation.kind != ViolationKind::EscapeType
            })
            .count();
        let penalty = (escape_types as u32)
            .saturating_mul(self.config.escape_type_penalty)
            .saturating_add((penalised as u32).saturating_mul(self.config.violation_penalty));
        let value = MAX_SCORE.saturating_sub(penalty);
        let hard = violations.iter().any(|violation| violation.kind.is_hard());

        Score {
            value,
            accepted: !hard && value >= self.config.threshold,
            escape_types,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_core::{CommandKey, PathStrip};

    const SERVICE: &str = "export class UserService {\n  list(): User[] {\n    return [];\n  }\n}\n";

    fn snapshot() -> FileSnapshot {
        FileSnapshot::new().with_file("src/user-service.ts", SERVICE)
    }

    fn diff_adding(line: &str) -> Diff {
        Diff::new(
            format!(
                "--- a/src/user-service.ts\n+++ b/src/user-service.ts\n@@ -3,3 +3,4 @@\n     return [];\n   }}\n+{line}\n }}\n"
            ),
            PathStrip::P1,
        )
    }

    #[test]
    fn test_clean_diff_scores_full() {
        let judge = QualityJudge::default();
        let diff = diff_adding("  get(id: string): User { return find(id); }");
        let score = judge.judge(&diff, &PatternContract::default(), &[], &snapshot());
        assert_eq!(score.violations, Vec::new());
        assert_eq!(score.value, MAX_SCORE);
        assert!(score.accepted);
    }

    #[test]
    fn test_introduced_any_is_penalised_per_occurrence() {
        let judge = QualityJudge::default();
        let diff = diff_adding("  get(id: any): any { return find(id); }");
        let score = judge.judge(&diff, &PatternContract::default(), &[], &snapshot());
        assert_eq!(score.escape_types, 2);
        assert_eq!(score.value, 90);
        assert!(score.accepted);
    }

    #[test]
    fn test_failing_diagnostics_reject_regardless_of_score() {
        let judge = QualityJudge::default();
        let diff = diff_adding("  get(id: string): User { return find(id); }");
        let failing = [
            Diagnostics::completed(CommandKey::Lint, 0, ""),
            Diagnostics::completed(CommandKey::Test, 1, "1 failed"),
        ];
        let score = judge.judge(&diff, &PatternContract::default(), &failing, &snapshot());
        assert_eq!(score.value, MAX_SCORE);
        assert!(!score.accepted);
        assert!(score.hard_failed());
    }

    #[test]
    fn test_forbidden_naming_and_syntax() {
        let judge = QualityJudge::default();
        let contract = PatternContract::default();

        let todo = diff_adding("  // TODO: fetch_user later");
        let score = judge.judge(&todo, &contract, &[], &snapshot());
        assert_eq!(score.value, 90);
        assert!(
            score
                .violations
                .iter()
                .any(|violation| violation.kind == ViolationKind::Forbidden)
        );

        let snake = diff_adding("  fetch_user() { return null; }");
        let score = judge.judge(&snake, &contract, &[], &snapshot());
        assert!(
            score
                .violations
                .iter()
                .any(|violation| violation.kind == ViolationKind::Naming)
        );

        let broken = diff_adding("  get( {");
        let score = judge.judge(&broken, &contract, &[], &snapshot());
        assert!(
            score
                .violations
                .iter()
                .any(|violation| violation.kind == ViolationKind::Syntax)
        );
    }

    #[test]
    fn test_threshold_rejects_many_soft_violations() {
        let judge = QualityJudge::new(JudgeConfig {
            threshold: 95,
            ..JudgeConfig::default()
        });
        let diff = diff_adding("  get(id: string): User { return find(id); } // FIXME: slow");
        let score = judge.judge(&diff, &PatternContract::default(), &[], &snapshot());
        assert_eq!(score.value, 90);
        assert!(!score.accepted);
        assert!(!score.hard_failed());
    }

    #[test]
    fn test_unapplicable_diff_is_hard_failure() {
        let judge = QualityJudge::default();
        let diff = diff_adding("  x() {}");
        let score = judge.judge(&diff, &PatternContract::default(), &[], &FileSnapshot::new());
        assert!(!score.accepted);
        assert_eq!(
            score.violations.first().map(|violation| violation.kind),
            Some(ViolationKind::Patch)
        );
    }

    #[test]
    fn test_new_file_outside_layout() {
        let judge = QualityJudge::default();
        let diff = Diff::new(
            "--- /dev/null\n+++ b/lib/helpers.ts\n@@ -0,0 +1 @@\n+export function formatName() {}\n",
            PathStrip::P1,
        );
        let score = judge.judge(&diff, &PatternContract::default(), &[], &FileSnapshot::new());
        let kinds: Vec<ViolationKind> = score.violations.iter().map(|violation| violation.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::Layout]);
        assert_eq!(score.value, 90);
    }
}
