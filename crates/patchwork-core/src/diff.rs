//! Unified diff values and generator candidates.

use crate::edit::PatchOps;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// How many leading path components to strip from diff headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStrip {
    /// Paths are used as written (`-p0`)
    P0,
    /// Strip one component, as in `a/` and `b/` prefixes (`-p1`)
    #[default]
    P1,
}

impl PathStrip {
    /// Number of components stripped.
    pub const fn components(self) -> usize {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
        }
    }

    /// Flag understood by `git apply` and `patch`.
    pub const fn flag(self) -> &'static str {
        match self {
            Self::P0 => "-p0",
            Self::P1 => "-p1",
        }
    }

    /// Strips leading components from a header path.
    ///
    /// Returns `None` when the path has too few components.
    pub fn strip<'path>(self, path: &'path str) -> Option<&'path str> {
        let mut rest = path;
        for _ in 0..self.components() {
            let (_, tail) = rest.split_once('/')?;
            rest = tail;
        }
        Some(rest)
    }
}

impl fmt::Display for PathStrip {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::P0 => "p0",
            Self::P1 => "p1",
        })
    }
}

impl FromStr for PathStrip {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "p0" | "0" => Ok(Self::P0),
            "p1" | "1" => Ok(Self::P1),
            other => Err(format!("unknown path strip `{other}`")),
        }
    }
}

/// A unified diff in a known path dialect. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    text: String,
    dialect: PathStrip,
}

impl Diff {
    /// Wraps diff text with its path dialect.
    pub fn new(text: impl Into<String>, dialect: PathStrip) -> Self {
        Self {
            text: text.into(),
            dialect,
        }
    }

    /// The empty diff.
    pub fn empty(dialect: PathStrip) -> Self {
        Self::new(String::new(), dialect)
    }

    /// Raw diff text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Path dialect of the headers.
    pub const fn dialect(&self) -> PathStrip {
        self.dialect
    }

    /// Whether the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Target paths named by `+++` headers, dialect-stripped, in order.
    ///
    /// Deletions (`+++ /dev/null`) report the `---` path instead.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut previous_old: Option<&str> = None;

        for line in self.text.lines() {
            if let Some(old) = line.strip_prefix("--- ") {
                previous_old = Some(header_path(old));
            } else if let Some(new) = line.strip_prefix("+++ ") {
                let raw = match header_path(new) {
                    "/dev/null" => previous_old.unwrap_or("/dev/null"),
                    path => path,
                };
                if let Some(stripped) = self.dialect.strip(raw)
                    && !paths.iter().any(|existing| existing == stripped)
                {
                    paths.push(stripped.to_owned());
                }
            }
        }

        paths
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.text)
    }
}

/// Header path without the trailing timestamp some tools append.
fn header_path(header: &str) -> &str {
    header.split('\t').next().unwrap_or(header).trim_end()
}

/// What a generator returned for one attempt: exactly one representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Candidate {
    /// A raw unified diff
    Diff(Diff),
    /// Structured edits to be compiled into a diff
    Ops(PatchOps),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
--- a/src/a.ts
+++ b/src/a.ts
@@ -1 +1 @@
-old
+new
--- a/src/gone.ts
+++ /dev/null
@@ -1 +0,0 @@
-bye
";

    #[test]
    fn test_touched_paths_strip_prefix() {
        let diff = Diff::new(SAMPLE, PathStrip::P1);
        assert_eq!(diff.touched_paths(), vec!["src/a.ts", "src/gone.ts"]);
    }

    #[test]
    fn test_p0_keeps_paths() {
        let diff = Diff::new("--- src/a.ts\n+++ src/a.ts\n@@ -1 +1 @@\n-a\n+b\n", PathStrip::P0);
        assert_eq!(diff.touched_paths(), vec!["src/a.ts"]);
    }

    #[test]
    fn test_empty_diff() {
        assert!(Diff::empty(PathStrip::P1).is_empty());
        assert!(Diff::new("\n  \n", PathStrip::P1).is_empty());
        assert!(!Diff::new(SAMPLE, PathStrip::P1).is_empty());
    }

    #[test]
    fn test_path_strip_parse() {
        assert_eq!("p0".parse::<PathStrip>(), Ok(PathStrip::P0));
        assert_eq!("1".parse::<PathStrip>(), Ok(PathStrip::P1));
        if let Ok(strip) = "p3".parse::<PathStrip>() {
            panic!("unknown strip parsed as {strip}");
        }
        assert_eq!(PathStrip::P1.strip("a/src/x.ts"), Some("src/x.ts"));
        assert_eq!(PathStrip::P1.strip("x.ts"), None);
    }
}
