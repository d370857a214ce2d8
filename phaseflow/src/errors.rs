//! Error types for the phaseflow executor.
//!
//! Unit-level errors (`RecoverableUnit`, `FatalUnit`) are resolved locally by
//! the retry policy and only surface through the decision log. Store, config
//! and collaborator errors are returned to the caller of the coordinator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for phaseflow operations.
#[derive(Debug, Error)]
pub enum PhaseflowError {
    /// A unit failed in a way that is eligible for retry or escalation.
    #[error("Recoverable failure in unit '{unit_id}': {diagnostic}")]
    RecoverableUnit {
        /// The failing unit.
        unit_id: String,
        /// Diagnostic reported by the executor.
        diagnostic: String,
    },

    /// A unit cannot proceed under any policy.
    #[error("Fatal failure in unit '{unit_id}': {diagnostic}")]
    FatalUnit {
        /// The failing unit.
        unit_id: String,
        /// Diagnostic reported by the executor.
        diagnostic: String,
    },

    /// A dependency cycle was detected.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The persisted progress record failed structural validation.
    #[error("{0}")]
    ProgressStoreCorrupt(#[from] StoreCorruptError),

    /// There is no paused or interrupted run to resume.
    #[error("No resumable run: {0}")]
    NoResumableRun(String),

    /// A resumable run already occupies the progress store.
    #[error("Run '{0}' is still active; resume it instead of starting a new one")]
    ActiveRunExists(String),

    /// Workflow configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An external collaborator reported an error.
    #[error("Executor error: {0}")]
    Executor(#[from] anyhow::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for PhaseflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata attached to an error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "STORE-001-CORRUPT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error describing a dependency cycle among units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected among units: {}", cycle.join(" -> "))]
pub struct CycleDetectedError {
    /// The units participating in the cycle, in declaration order.
    pub cycle: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "RESOLVER-001-CYCLE",
            format!("Units form a dependency cycle: {}", cycle.join(" -> ")),
        )
        .with_fix_hint("Cyclic units are scheduled as independent units in declaration order.");

        Self {
            cycle,
            error_info: info,
        }
    }
}

/// Error raised when a persisted run record fails validation on load.
#[derive(Debug, Clone, Error)]
#[error("Progress store corrupt at {}: {reason}", path.as_ref().map_or_else(|| "<memory>".to_string(), |p| p.display().to_string()))]
pub struct StoreCorruptError {
    /// Location of the record, if file-backed.
    pub path: Option<PathBuf>,
    /// What failed validation.
    pub reason: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl StoreCorruptError {
    /// Creates a new corrupt store error.
    #[must_use]
    pub fn new(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut info = ErrorInfo::new("STORE-001-CORRUPT", reason.clone()).with_fix_hint(
            "Inspect or restore the progress record by hand; it is never reset automatically.",
        );
        if let Some(path) = &path {
            info = info.with_context_entry("path", path.display().to_string());
        }
        Self {
            path,
            reason,
            error_info: info,
        }
    }
}
