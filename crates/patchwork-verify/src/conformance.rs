//! Pattern-contract checks over one touched file.

use crate::judge::{Violation, ViolationKind};
use crate::typescan::SourceFacts;
use patchwork_core::{CaseStyle, LayoutRule, MethodStyle, PatternContract};
use regex::Regex;
use std::collections::HashSet;

fn is_under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() || dir == "." {
        return true;
    }
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// File name up to its first `.`: `user-service.test.ts` → `user-service`.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

/// Checks that a source file lives where the layout expects.
pub fn check_layout(layout: &LayoutRule, path: &str) -> Option<Violation> {
    if layout
        .test_dir
        .as_deref()
        .is_some_and(|test_dir| is_under(path, test_dir))
    {
        return None;
    }
    if !is_under(path, &layout.base_dir) {
        return Some(Violation::new(
            ViolationKind::Layout,
            format!("{path} is outside `{}`", layout.base_dir),
        )
        .with_path(path));
    }
    let without_extension = path.rsplit_once('.').map_or(path, |(head, _)| head);
    if let Some(suffix) = layout.file_suffix.as_deref()
        && !without_extension.ends_with(suffix)
        && !path.ends_with(suffix)
    {
        return Some(Violation::new(
            ViolationKind::Layout,
            format!("{path} does not end with `{suffix}`"),
        )
        .with_path(path));
    }
    None
}

/// Function and method names declared in `post` but not in `pre`.
fn introduced_names<'facts>(pre: &'facts SourceFacts, post: &'facts SourceFacts) -> Vec<&'facts str> {
    let existing: HashSet<&str> = pre
        .functions
        .iter()
        .map(String::as_str)
        .chain(pre.methods().map(|method| method.name.as_str()))
        .collect();
    post.functions
        .iter()
        .map(String::as_str)
        .chain(post.methods().map(|method| method.name.as_str()))
        .filter(|name| !existing.contains(name))
        .collect()
}

/// Checks identifier and file-name casing. Only new names are judged, and the
/// file name only when the file is new.
pub fn check_naming(
    contract: &PatternContract,
    path: &str,
    pre: Option<&SourceFacts>,
    post: &SourceFacts,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let empty = SourceFacts::default();

    if pre.is_none() {
        let stem = file_stem(path);
        if !contract.naming.file_case.matches(stem) {
            violations.push(
                Violation::new(
                    ViolationKind::Naming,
                    format!("file name `{stem}` is not {}", case_name(contract.naming.file_case)),
                )
                .with_path(path),
            );
        }
    }

    for name in introduced_names(pre.unwrap_or(&empty), post) {
        if name != "constructor" && !contract.naming.method_case.matches(name) {
            violations.push(
                Violation::new(
                    ViolationKind::Naming,
                    format!("`{name}` is not {}", case_name(contract.naming.method_case)),
                )
                .with_path(path),
            );
        }
    }
    violations
}

const fn case_name(style: CaseStyle) -> &'static str {
    match style {
        CaseStyle::Camel => "camelCase",
        CaseStyle::Pascal => "PascalCase",
        CaseStyle::Snake => "snake_case",
        CaseStyle::Kebab => "kebab-case",
    }
}

/// Checks the containers the contract declares for `path`.
pub fn check_containers(
    contract: &PatternContract,
    path: &str,
    pre: Option<&SourceFacts>,
    post: &SourceFacts,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some(rule) = contract.container_for(path) else {
        return violations;
    };

    let existing: HashSet<(&str, &str)> = pre
        .map(|facts| {
            facts
                .classes
                .iter()
                .flat_map(|class| {
                    class
                        .methods
                        .iter()
                        .map(|method| (class.name.as_str(), method.name.as_str()))
                })
                .collect()
        })
        .unwrap_or_default();
    let is_new = |class: &str, method: &str| !existing.contains(&(class, method));

    if rule.kind.eq_ignore_ascii_case("class") {
        let Some(class) = post.class(&rule.name) else {
            violations.push(
                Violation::new(
                    ViolationKind::Container,
                    format!("class `{}` is missing", rule.name),
                )
                .with_path(path),
            );
            return violations;
        };
        for method in class
            .methods
            .iter()
            .filter(|method| is_new(&class.name, &method.name))
        {
            let wrong = match rule.method_style {
                MethodStyle::Instance => method.is_static,
                MethodStyle::Static => !method.is_static,
                MethodStyle::Free => true,
            };
            if wrong {
                violations.push(
                    Violation::new(
                        ViolationKind::MethodStyle,
                        format!(
                            "`{}.{}` does not follow {:?} method style",
                            rule.name, method.name, rule.method_style
                        ),
                    )
                    .with_path(path),
                );
            }
        }
    } else if rule.method_style == MethodStyle::Free {
        for class in &post.classes {
            if class
                .methods
                .iter()
                .any(|method| is_new(&class.name, &method.name))
            {
                violations.push(
                    Violation::new(
                        ViolationKind::MethodStyle,
                        format!(
                            "{} `{}` expects free functions, not methods on `{}`",
                            rule.kind, rule.name, class.name
                        ),
                    )
                    .with_path(path),
                );
            }
        }
    }
    violations
}

/// Forbidden patterns compiled once per judgement.
///
/// Identifier-like patterns match on word boundaries; anything else is a
/// plain substring.
#[derive(Debug)]
pub struct ForbiddenPatterns {
    patterns: Vec<(String, Option<Regex>)>,
}

impl ForbiddenPatterns {
    /// Compiles the contract's `forbid` list.
    pub fn new(contract: &PatternContract) -> Self {
        let patterns = contract
            .forbid
            .iter()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                let word_like = pattern
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$');
                let matcher = if word_like {
                    Regex::new(&format!(r"\b{}\b", regex::escape(pattern))).ok()
                } else {
                    None
                };
                (pattern.clone(), matcher)
            })
            .collect();
        Self { patterns }
    }

    fn matches(pattern: &str, matcher: Option<&Regex>, line: &str) -> bool {
        matcher.map_or_else(|| line.contains(pattern), |regex| regex.is_match(line))
    }

    /// One violation per pattern found in `added_lines`.
    pub fn check(&self, path: &str, added_lines: &[String]) -> Vec<Violation> {
        self.patterns
            .iter()
            .filter(|(pattern, matcher)| {
                added_lines
                    .iter()
                    .any(|line| Self::matches(pattern, matcher.as_ref(), line))
            })
            .map(|(pattern, _)| {
                Violation::new(
                    ViolationKind::Forbidden,
                    format!("added code contains forbidden `{pattern}`"),
                )
                .with_path(path)
            })
            .collect()
    }
}
