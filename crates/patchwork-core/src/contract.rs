//! Pattern contracts: the conventions a repository expects new code to follow.

use serde::{Deserialize, Serialize};

/// Identifier casing convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStyle {
    /// `fetchUser`
    Camel,
    /// `FetchUser`
    Pascal,
    /// `fetch_user`
    Snake,
    /// `fetch-user`
    Kebab,
}

impl CaseStyle {
    /// Checks whether `identifier` follows this casing.
    ///
    /// Leading underscores and `$` are ignored, as they mark private or
    /// framework-reserved names rather than casing.
    pub fn matches(self, identifier: &str) -> bool {
        let trimmed = identifier.trim_start_matches(['_', '$']);
        let mut chars = trimmed.chars();
        let Some(first) = chars.next() else {
            return true;
        };

        match self {
            Self::Camel => {
                first.is_ascii_lowercase() && trimmed.chars().all(|ch| ch.is_ascii_alphanumeric())
            }
            Self::Pascal => {
                first.is_ascii_uppercase() && trimmed.chars().all(|ch| ch.is_ascii_alphanumeric())
            }
            Self::Snake => {
                first.is_ascii_lowercase()
                    && trimmed
                        .chars()
                        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
            }
            Self::Kebab => {
                first.is_ascii_lowercase()
                    && trimmed
                        .chars()
                        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
            }
        }
    }
}

/// How methods of a container are declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodStyle {
    /// Instance methods on a class
    #[default]
    Instance,
    /// Static methods on a class
    Static,
    /// Free functions exported from a module
    Free,
}

/// Where source files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRule {
    /// Directory new source files belong under
    pub base_dir: String,
    /// Required file name suffix before the extension (e.g. `.controller`)
    #[serde(default)]
    pub file_suffix: Option<String>,
    /// Directory test files may live under instead
    #[serde(default)]
    pub test_dir: Option<String>,
}

impl Default for LayoutRule {
    fn default() -> Self {
        Self {
            base_dir: "src".to_owned(),
            file_suffix: None,
            test_dir: None,
        }
    }
}

/// A class or module that owns a group of operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRule {
    /// `class` or `module`
    pub kind: String,
    /// Declared name
    pub name: String,
    /// File the container is declared in
    pub file: String,
    /// Expected method style
    #[serde(default)]
    pub method_style: MethodStyle,
}

/// A helper that calls of a given kind should go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperRule {
    /// Wrapper function name
    pub name: String,
    /// Module the wrapper is imported from
    pub import_from: String,
    /// Whether use of the wrapper is mandatory
    #[serde(default)]
    pub mandatory: bool,
}

/// Preferred import path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRule {
    /// Path prefix imports should use
    pub prefer_path: String,
}

/// Identifier and file naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConvention {
    /// Casing for functions and methods
    pub method_case: CaseStyle,
    /// Casing for file stems
    pub file_case: CaseStyle,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            method_case: CaseStyle::Camel,
            file_case: CaseStyle::Kebab,
        }
    }
}

/// Conventions inferred from a repository that new code must follow.
///
/// Produced by context discovery; read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternContract {
    /// Primary language tag (`ts`, `js`, `rs`, ...)
    pub language: String,
    /// File layout rule
    #[serde(default)]
    pub layout: LayoutRule,
    /// Declared containers
    #[serde(default)]
    pub containers: Vec<ContainerRule>,
    /// Wrapper helpers
    #[serde(default)]
    pub wrappers: Vec<WrapperRule>,
    /// Import preferences
    #[serde(default)]
    pub imports: Vec<ImportRule>,
    /// Naming convention
    #[serde(default)]
    pub naming: NamingConvention,
    /// Patterns that must not appear in added code
    #[serde(default)]
    pub forbid: Vec<String>,
}

impl Default for PatternContract {
    fn default() -> Self {
        Self {
            language: "ts".to_owned(),
            layout: LayoutRule::default(),
            containers: Vec::new(),
            wrappers: Vec::new(),
            imports: Vec::new(),
            naming: NamingConvention::default(),
            forbid: vec!["TODO:".to_owned(), "FIXME:".to_owned()],
        }
    }
}

impl PatternContract {
    /// Looks up the container declared in `file`, if any.
    pub fn container_for(&self, file: &str) -> Option<&ContainerRule> {
        self.containers.iter().find(|container| container.file == file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_styles() {
        assert!(CaseStyle::Camel.matches("fetchUser"));
        assert!(!CaseStyle::Camel.matches("FetchUser"));
        assert!(!CaseStyle::Camel.matches("fetch_user"));
        assert!(CaseStyle::Pascal.matches("UserService"));
        assert!(CaseStyle::Snake.matches("fetch_user_2"));
        assert!(!CaseStyle::Snake.matches("fetchUser"));
        assert!(CaseStyle::Kebab.matches("user-service"));
        assert!(!CaseStyle::Kebab.matches("user_service"));
        assert!(CaseStyle::Camel.matches("_privateHelper"));
    }

    #[test]
    fn test_contract_from_json_uses_defaults() {
        let json = r#"{
            "language": "ts",
            "containers": [{"kind": "class", "name": "Api", "file": "src/api.ts"}],
            "naming": {"method_case": "camel", "file_case": "kebab"}
        }"#;
        let contract: PatternContract = match serde_json::from_str(json) {
            Ok(contract) => contract,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(contract.layout.base_dir, "src");
        assert_eq!(
            contract.container_for("src/api.ts").map(|container| container.method_style),
            Some(MethodStyle::Instance)
        );
        assert!(contract.forbid.is_empty());
    }
}
