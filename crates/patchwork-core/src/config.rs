//! Pipeline configuration: gate policy, budgets, commands and judge weights.

use crate::diagnostics::CommandKey;
use crate::diff::PathStrip;
use crate::gate::GateMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::fs as tokio_fs;
use tracing::debug;

/// Repository-local adapter file, relative to the repository root.
pub const ADAPTER_CONFIG_PATH: &str = ".patchwork/adapter.toml";

/// Shell commands for each repository command key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Lint command
    pub lint: Option<String>,
    /// Type-check command
    pub typecheck: Option<String>,
    /// Test command
    pub test: Option<String>,
    /// Build command
    pub build: Option<String>,
    /// Dependency install command
    pub install: Option<String>,
}

#[derive(Deserialize)]
struct AdapterFile {
    #[serde(default)]
    commands: AdapterConfig,
}

impl AdapterConfig {
    /// Command line configured for `key`, if any. Blank entries count as absent.
    pub fn command(&self, key: CommandKey) -> Option<&str> {
        let command = match key {
            CommandKey::Lint => &self.lint,
            CommandKey::Typecheck => &self.typecheck,
            CommandKey::Test => &self.test,
            CommandKey::Build => &self.build,
            CommandKey::Install => &self.install,
        };
        command.as_deref().filter(|line| !line.trim().is_empty())
    }

    /// Sets the command for `key`.
    #[must_use]
    pub fn with_command(mut self, key: CommandKey, command: impl Into<String>) -> Self {
        let slot = match key {
            CommandKey::Lint => &mut self.lint,
            CommandKey::Typecheck => &mut self.typecheck,
            CommandKey::Test => &mut self.test,
            CommandKey::Build => &mut self.build,
            CommandKey::Install => &mut self.install,
        };
        *slot = Some(command.into());
        self
    }

    /// Loads the `[commands]` table of `<repo>/.patchwork/adapter.toml`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_for_repo(repo: &Path) -> Result<Option<Self>> {
        let path = repo.join(ADAPTER_CONFIG_PATH);
        if !tokio_fs::try_exists(&path).await? {
            return Ok(None);
        }
        let contents = tokio_fs::read_to_string(&path).await?;
        let file: AdapterFile = toml::from_str(&contents)?;
        debug!("Loaded adapter commands from {}", path.display());
        Ok(Some(file.commands))
    }

    /// Repository commands if present, otherwise `fallback`.
    ///
    /// # Errors
    /// Returns an error if the repository file exists but is invalid.
    pub async fn resolve(repo: &Path, fallback: &Self) -> Result<Self> {
        Ok(Self::load_for_repo(repo)
            .await?
            .unwrap_or_else(|| fallback.clone()))
    }
}

/// Which commands run during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Keys run in order
    pub commands: Vec<CommandKey>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            commands: CommandKey::VERIFY_ORDER.to_vec(),
        }
    }
}

/// Quality judge scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Minimum score for acceptance (0-100)
    pub threshold: u32,
    /// Points lost per introduced escape-hatch type
    pub escape_type_penalty: u32,
    /// Points lost per convention violation
    pub violation_penalty: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            threshold: 70,
            escape_type_penalty: 5,
            violation_penalty: 10,
        }
    }
}

/// Engine used to validate and apply diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyBackend {
    /// In-process unified diff engine
    #[default]
    Native,
    /// `git apply`
    Git,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gate policy; `PATCHWORK_GATE_MODE` overrides it at run start
    pub gate_mode: GateMode,
    /// Generation attempts per step
    pub max_attempts: usize,
    /// Timeout for each repository command
    pub command_timeout_seconds: u64,
    /// Timeout for each generator call
    pub generation_timeout_seconds: u64,
    /// Maximum captured command output
    pub max_output_bytes: usize,
    /// Path dialect assumed for generator diffs
    pub default_dialect: PathStrip,
    /// Diff engine
    pub apply_backend: ApplyBackend,
    /// Verify in a temporary copy before touching the real tree
    pub verify_in_sandbox: bool,
    /// Run the install command before the first step
    pub run_install: bool,
    /// Verification commands
    pub verify: VerifyConfig,
    /// Fallback command table
    pub commands: AdapterConfig,
    /// Judge scoring
    pub judge: JudgeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gate_mode: GateMode::Strict,
            max_attempts: 3,
            command_timeout_seconds: 300,
            generation_timeout_seconds: 300,
            max_output_bytes: 64 * 1024,
            default_dialect: PathStrip::P1,
            apply_backend: ApplyBackend::Native,
            verify_in_sandbox: false,
            run_install: false,
            verify: VerifyConfig::default(),
            commands: AdapterConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        debug!(
            "Loaded config from {}: gate_mode={}, max_attempts={}",
            path.display(),
            config.gate_mode,
            config.max_attempts
        );
        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|error| Error::Config(format!("Failed to serialize config: {error}")))?;
        let header = "# Patchwork pipeline configuration\n\n";
        fs::write(path, format!("{header}{contents}"))?;
        Ok(())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_owned()));
        }
        if self.command_timeout_seconds == 0 || self.generation_timeout_seconds == 0 {
            return Err(Error::Config("timeouts must be at least 1 second".to_owned()));
        }
        if self.judge.threshold > 100 {
            return Err(Error::Config("judge.threshold must be within 0-100".to_owned()));
        }
        Ok(())
    }

    /// Sets the gate mode.
    #[must_use]
    pub fn with_gate_mode(mut self, gate_mode: GateMode) -> Self {
        self.gate_mode = gate_mode;
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the fallback command table.
    #[must_use]
    pub fn with_commands(mut self, commands: AdapterConfig) -> Self {
        self.commands = commands;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.gate_mode, GateMode::Strict);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.judge.threshold, 70);
        assert_eq!(config.verify.commands.len(), 4);
        if let Err(error) = config.validate() {
            panic!("default config rejected: {error}");
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_text = r#"
gate_mode = "migrate"
max_attempts = 5

[commands]
lint = "npm run lint"

[judge]
threshold = 80
"#;
        let config: PipelineConfig = match toml::from_str(toml_text) {
            Ok(config) => config,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(config.gate_mode, GateMode::Migrate);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.commands.command(CommandKey::Lint), Some("npm run lint"));
        assert_eq!(config.commands.command(CommandKey::Test), None);
        assert_eq!(config.judge.threshold, 80);
        assert_eq!(config.judge.violation_penalty, 10);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("nested").join("config.toml");
        let config = PipelineConfig::default()
            .with_gate_mode(GateMode::Lenient)
            .with_commands(AdapterConfig::default().with_command(CommandKey::Test, "cargo test"));

        config.save_to_file(&path)?;
        let loaded = PipelineConfig::load_from_file(&path)?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = PipelineConfig::default().with_max_attempts(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_adapter_file_overrides_fallback() -> Result<()> {
        let temp = TempDir::new()?;
        let fallback = AdapterConfig::default().with_command(CommandKey::Lint, "fallback");

        let resolved = AdapterConfig::resolve(temp.path(), &fallback).await?;
        assert_eq!(resolved.command(CommandKey::Lint), Some("fallback"));

        fs::create_dir_all(temp.path().join(".patchwork"))?;
        fs::write(
            temp.path().join(ADAPTER_CONFIG_PATH),
            "[commands]\nlint = \"eslint .\"\ntest = \"  \"\n",
        )?;
        let resolved = AdapterConfig::resolve(temp.path(), &fallback).await?;
        assert_eq!(resolved.command(CommandKey::Lint), Some("eslint ."));
        assert_eq!(resolved.command(CommandKey::Test), None);
        Ok(())
    }
}
