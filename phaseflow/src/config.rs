//! Workflow configuration.
//!
//! A workflow is described by a JSON document:
//!
//! ```json
//! {
//!   "workflow_kind": "greenfield",
//!   "phases": [
//!     { "name": "architecture", "blocking": true, "units": [{ "id": "arch" }] },
//!     { "name": "stories", "generative": true }
//!   ],
//!   "retry": { "max_attempts": 3 },
//!   "escalation": { "defaults": { "lint": { "rules": "recommended" } } }
//! }
//! ```
//!
//! `PHASEFLOW_MAX_ATTEMPTS` and `PHASEFLOW_STATE_PATH` override the matching
//! fields after loading.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::core::PhaseDefinition;
use crate::errors::PhaseflowError;
use crate::pipeline::{EscalationConfig, RetryConfig};

/// Environment variable overriding `retry.max_attempts`.
pub const ENV_MAX_ATTEMPTS: &str = "PHASEFLOW_MAX_ATTEMPTS";
/// Environment variable overriding `state_path`.
pub const ENV_STATE_PATH: &str = "PHASEFLOW_STATE_PATH";

fn default_state_path() -> PathBuf {
    PathBuf::from(".phaseflow").join("current-run.json")
}

/// Everything needed to start a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Label of the workflow.
    pub workflow_kind: String,
    /// Ordered phase definitions.
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
    /// Retry bounds and backoff.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Escalation tiers.
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Location of the active progress record.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Context passed to every executor call.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl WorkflowConfig {
    /// Creates a configuration with no phases.
    #[must_use]
    pub fn new(workflow_kind: impl Into<String>) -> Self {
        Self {
            workflow_kind: workflow_kind.into(),
            phases: Vec::new(),
            retry: RetryConfig::default(),
            escalation: EscalationConfig::default(),
            state_path: default_state_path(),
            context: HashMap::new(),
        }
    }

    /// Appends a phase.
    #[must_use]
    pub fn with_phase(mut self, phase: PhaseDefinition) -> Self {
        self.phases.push(phase);
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the escalation configuration.
    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = escalation;
        self
    }

    /// Sets the progress record path.
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    /// Adds an executor context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, PhaseflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PhaseflowError::Config(format!("unparseable workflow config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON file and applies environment overrides.
    pub fn from_path(path: &Path) -> Result<Self, PhaseflowError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PhaseflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_json(&contents)?;
        config.apply_overrides(std::env::vars())?;
        tracing::debug!(
            path = %path.display(),
            kind = %config.workflow_kind,
            phases = config.phases.len(),
            "workflow config loaded"
        );
        Ok(config)
    }

    /// Applies `PHASEFLOW_*` overrides from the given variables.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), PhaseflowError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            match key.as_ref() {
                ENV_MAX_ATTEMPTS => {
                    let value = value.into();
                    self.retry.max_attempts = value.trim().parse().map_err(|_| {
                        PhaseflowError::Config(format!("{ENV_MAX_ATTEMPTS} is not a count: '{value}'"))
                    })?;
                }
                ENV_STATE_PATH => self.state_path = PathBuf::from(value.into()),
                _ => {}
            }
        }
        self.validate()
    }

    /// Checks structural constraints.
    pub fn validate(&self) -> Result<(), PhaseflowError> {
        if self.workflow_kind.trim().is_empty() {
            return Err(PhaseflowError::Config("workflow_kind must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PhaseflowError::Config("retry.max_attempts must be at least 1".into()));
        }
        let mut phase_names = HashSet::new();
        let mut unit_ids = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(PhaseflowError::Config("phase name must not be empty".into()));
            }
            if !phase_names.insert(phase.name.as_str()) {
                return Err(PhaseflowError::Config(format!("duplicate phase '{}'", phase.name)));
            }
            for unit in &phase.units {
                if unit.id.trim().is_empty() {
                    return Err(PhaseflowError::Config(format!(
                        "phase '{}' declares a unit with an empty id",
                        phase.name
                    )));
                }
                if !unit_ids.insert(unit.id.as_str()) {
                    return Err(PhaseflowError::Config(format!("duplicate unit id '{}'", unit.id)));
                }
            }
        }
        Ok(())
    }
}
