//! Captured results of repository verification commands.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Named repository command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKey {
    /// Linter
    Lint,
    /// Type checker
    Typecheck,
    /// Test suite
    Test,
    /// Build
    Build,
    /// Dependency install
    Install,
}

impl CommandKey {
    /// Keys run during verification, in default order.
    pub const VERIFY_ORDER: [Self; 4] = [Self::Lint, Self::Typecheck, Self::Test, Self::Build];

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Typecheck => "typecheck",
            Self::Test => "test",
            Self::Build => "build",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for CommandKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lint" => Ok(Self::Lint),
            "typecheck" | "tsc" => Ok(Self::Typecheck),
            "test" => Ok(Self::Test),
            "build" => Ok(Self::Build),
            "install" => Ok(Self::Install),
            other => Err(format!("unknown command key `{other}`")),
        }
    }
}

/// Exit code reported for a command killed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Outcome of one command run. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Process exit code; 0 means pass
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
    /// Command that produced this
    pub tool: CommandKey,
    /// Whether the process was killed by its timeout
    pub timed_out: bool,
    /// Whether no command was configured for the key
    pub skipped: bool,
}

impl Diagnostics {
    /// Result of a command that ran to completion.
    pub fn completed(tool: CommandKey, exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            tool,
            timed_out: false,
            skipped: false,
        }
    }

    /// Result of a command killed by its timeout.
    pub fn timed_out(tool: CommandKey, output: impl Into<String>, timeout_seconds: u64) -> Self {
        let mut output = output.into();
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("[timed out after {timeout_seconds}s]"));
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            output,
            tool,
            timed_out: true,
            skipped: false,
        }
    }

    /// Vacuous pass for a command that is not configured.
    pub fn skipped(tool: CommandKey) -> Self {
        Self {
            exit_code: 0,
            output: String::new(),
            tool,
            timed_out: false,
            skipped: true,
        }
    }

    /// Whether the command passed.
    pub const fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        if self.skipped {
            format!("{}: skipped", self.tool)
        } else if self.timed_out {
            format!("{}: timed out", self.tool)
        } else if self.passed() {
            format!("{}: passed", self.tool)
        } else {
            format!("{}: failed (exit {})", self.tool, self.exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_is_vacuous_pass() {
        let diagnostics = Diagnostics::skipped(CommandKey::Lint);
        assert!(diagnostics.passed());
        assert!(diagnostics.skipped);
        assert_eq!(diagnostics.summary(), "lint: skipped");
    }

    #[test]
    fn test_timed_out_is_failure() {
        let diagnostics = Diagnostics::timed_out(CommandKey::Test, "partial", 5);
        assert!(!diagnostics.passed());
        assert!(diagnostics.timed_out);
        assert_eq!(diagnostics.exit_code, TIMEOUT_EXIT_CODE);
        assert!(diagnostics.output.ends_with("[timed out after 5s]"));
    }

    #[test]
    fn test_command_key_parse() {
        assert_eq!("TypeCheck".parse::<CommandKey>(), Ok(CommandKey::Typecheck));
        if let Ok(key) = "deploy".parse::<CommandKey>() {
            panic!("unknown command key parsed as {key}");
        }
    }
}
