//! Executor outcome type with factory methods.

use super::UnitSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PhaseflowError;

/// Classification of a single executor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The unit of work finished.
    Success,
    /// Transient failure, eligible for retry and escalation.
    Recoverable,
    /// The unit cannot proceed under any policy.
    Fatal,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A remediation the executor suggests alongside a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Remedy {
    /// The attempt disagrees with a source-of-truth artifact; regenerate from it.
    DeferToUpstream {
        /// Identifier of the source-of-truth artifact.
        source: String,
    },
    /// A documented default may stand in for the unit's result.
    UseDefault {
        /// The default value to record.
        value: serde_json::Value,
        /// Human-readable description of the default.
        description: String,
    },
}

/// The result of one `TaskExecutor` invocation.
///
/// Outcomes are transient: the phase runner folds them into unit state and
/// decisions and never persists them standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Classification of the result.
    pub kind: OutcomeKind,
    /// Diagnostic message for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Suggested remediation for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<Remedy>,
    /// Artifact identifiers produced by the unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Units discovered while executing (generative phases).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_units: Vec<UnitSpec>,
}

impl Outcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            diagnostic: None,
            remedy: None,
            artifacts: Vec::new(),
            discovered_units: Vec::new(),
        }
    }

    /// Creates a recoverable failure with a diagnostic.
    #[must_use]
    pub fn recoverable(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Recoverable,
            diagnostic: Some(diagnostic.into()),
            ..Self::success()
        }
    }

    /// Creates a fatal failure with a diagnostic.
    #[must_use]
    pub fn fatal(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Fatal,
            diagnostic: Some(diagnostic.into()),
            ..Self::success()
        }
    }

    /// Attaches a suggested remedy.
    #[must_use]
    pub fn with_remedy(mut self, remedy: Remedy) -> Self {
        self.remedy = Some(remedy);
        self
    }

    /// Adds a produced artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    /// Adds a discovered unit.
    #[must_use]
    pub fn with_discovered_unit(mut self, unit: UnitSpec) -> Self {
        self.discovered_units.push(unit);
        self
    }

    /// Returns true if the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Returns the diagnostic or a placeholder.
    #[must_use]
    pub fn diagnostic_or_default(&self) -> &str {
        self.diagnostic.as_deref().unwrap_or("no diagnostic provided")
    }

    /// Converts a failed outcome into the matching unit error.
    #[must_use]
    pub fn to_error(&self, unit_id: &str) -> Option<PhaseflowError> {
        let diagnostic = self.diagnostic_or_default().to_string();
        match self.kind {
            OutcomeKind::Success => None,
            OutcomeKind::Recoverable => Some(PhaseflowError::RecoverableUnit {
                unit_id: unit_id.to_string(),
                diagnostic,
            }),
            OutcomeKind::Fatal => Some(PhaseflowError::FatalUnit {
                unit_id: unit_id.to_string(),
                diagnostic,
            }),
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::success()
    }
}
