//! Run, phase and unit status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is executing.
    #[default]
    InProgress,
    /// The run stopped at a unit boundary and can be resumed.
    Paused,
    /// Every phase reached a terminal state and no blocking phase failed.
    Completed,
    /// A blocking phase failed.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Returns true if the run will not execute any further.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the run can be picked up by a resume.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::InProgress)
    }
}

/// The execution status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Units are being executed.
    Running,
    /// Every unit is terminal and no unabsorbed failure exists.
    Completed,
    /// A required unit failed with no escalation path.
    Failed,
    /// Optional phase whose preconditions were unmet.
    Skipped,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl PhaseStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// The execution status of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Waiting to be executed.
    #[default]
    Pending,
    /// The executor is generating or implementing the unit.
    #[serde(alias = "generating", alias = "implementing")]
    Running,
    /// Finished successfully, possibly with a substituted default.
    Completed,
    /// Skipped by policy.
    Skipped,
    /// Failed fatally.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl UnitStatus {
    /// Returns true if the unit reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    /// Returns true if dependents of a unit in this state may complete.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::InProgress.to_string(), "in_progress");
        assert_eq!(RunStatus::Paused.to_string(), "paused");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_run_status_terminal_and_resumable() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::Paused.is_resumable());
        assert!(RunStatus::InProgress.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
    }

    #[test]
    fn test_phase_status_is_terminal() {
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Skipped.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
        assert!(!PhaseStatus::Pending.is_terminal());
    }

    #[test]
    fn test_unit_status_dependency_satisfaction() {
        assert!(UnitStatus::Completed.satisfies_dependents());
        assert!(UnitStatus::Skipped.satisfies_dependents());
        assert!(!UnitStatus::Failed.satisfies_dependents());
        assert!(UnitStatus::Failed.is_terminal());
        assert!(!UnitStatus::Running.is_terminal());
    }

    #[test]
    fn test_unit_status_serialize() {
        let json = serde_json::to_string(&UnitStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);

        let parsed: UnitStatus = serde_json::from_str(r#""implementing""#).unwrap();
        assert_eq!(parsed, UnitStatus::Running);
    }
}
