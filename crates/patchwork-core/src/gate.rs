//! Gate mode: how verification and judging failures are treated.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Environment variable that overrides the configured gate mode.
pub const GATE_MODE_ENV: &str = "PATCHWORK_GATE_MODE";

/// Policy applied at the verifying and judging states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Any verification failure or judge rejection aborts the step
    #[default]
    Strict,
    /// Failures become warnings and feedback; the step is accepted
    Migrate,
    /// Verification and judging are skipped
    Lenient,
}

impl GateMode {
    /// Resolves the mode from an optional override value, falling back to `configured`.
    ///
    /// Unrecognised values are logged and ignored.
    pub fn resolve(override_value: Option<&str>, configured: Self) -> Self {
        match override_value.map(str::parse::<Self>) {
            Some(Ok(mode)) => mode,
            Some(Err(error)) => {
                warn!("Ignoring {GATE_MODE_ENV}: {error}");
                configured
            }
            None => configured,
        }
    }

    /// Resolves the mode from `PATCHWORK_GATE_MODE`, falling back to `configured`.
    pub fn from_env_or(configured: Self) -> Self {
        let value = env::var(GATE_MODE_ENV).ok();
        Self::resolve(value.as_deref(), configured)
    }

    /// Whether verification and judging run at all.
    pub const fn runs_checks(self) -> bool {
        !matches!(self, Self::Lenient)
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Strict => "strict",
            Self::Migrate => "migrate",
            Self::Lenient => "lenient",
        })
    }
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "migrate" => Ok(Self::Migrate),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown gate mode `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!("STRICT".parse::<GateMode>(), Ok(GateMode::Strict));
        assert_eq!(" migrate ".parse::<GateMode>(), Ok(GateMode::Migrate));
        assert_eq!("lenient".parse::<GateMode>(), Ok(GateMode::Lenient));
        if let Ok(mode) = "loose".parse::<GateMode>() {
            panic!("unknown gate mode parsed as {mode}");
        }
    }

    #[test]
    fn test_resolve_override() {
        assert_eq!(
            GateMode::resolve(Some("lenient"), GateMode::Strict),
            GateMode::Lenient
        );
        assert_eq!(
            GateMode::resolve(Some("bogus"), GateMode::Migrate),
            GateMode::Migrate
        );
        assert_eq!(GateMode::resolve(None, GateMode::Strict), GateMode::Strict);
    }

    #[test]
    fn test_lenient_skips_checks() {
        assert!(GateMode::Strict.runs_checks());
        assert!(GateMode::Migrate.runs_checks());
        assert!(!GateMode::Lenient.runs_checks());
    }
}
