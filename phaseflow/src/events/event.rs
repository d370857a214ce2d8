//! Lifecycle events published while a run executes.

use serde::{Deserialize, Serialize};

use crate::core::{PhaseStatus, RunStatus, UnitStatus};

/// A run, phase or unit lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A new run was created.
    RunStarted {
        /// Run id.
        run_id: String,
        /// Workflow label.
        workflow_kind: String,
    },
    /// The run stopped at a unit boundary.
    RunPaused {
        /// Run id.
        run_id: String,
        /// Operator-supplied reason.
        reason: String,
    },
    /// A paused or interrupted run continues.
    RunResumed {
        /// Run id.
        run_id: String,
    },
    /// The run reached a terminal status.
    RunFinished {
        /// Run id.
        run_id: String,
        /// Terminal status.
        status: RunStatus,
    },
    /// A phase began executing.
    PhaseStarted {
        /// Run id.
        run_id: String,
        /// Phase name.
        phase: String,
    },
    /// A phase reached a terminal status.
    PhaseFinished {
        /// Run id.
        run_id: String,
        /// Phase name.
        phase: String,
        /// Terminal status.
        status: PhaseStatus,
    },
    /// A unit is about to be executed.
    UnitStarted {
        /// Run id.
        run_id: String,
        /// Owning phase.
        phase: String,
        /// Unit id.
        unit: String,
    },
    /// A unit reached a terminal status.
    UnitFinished {
        /// Run id.
        run_id: String,
        /// Owning phase.
        phase: String,
        /// Unit id.
        unit: String,
        /// Terminal status.
        status: UnitStatus,
        /// Executor calls made for the unit.
        attempts: u32,
        /// Run completion after this unit, in percent.
        completion: f64,
    },
}

impl WorkflowEvent {
    /// Dotted event name, e.g. `unit.finished`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::RunPaused { .. } => "run.paused",
            Self::RunResumed { .. } => "run.resumed",
            Self::RunFinished { .. } => "run.finished",
            Self::PhaseStarted { .. } => "phase.started",
            Self::PhaseFinished { .. } => "phase.finished",
            Self::UnitStarted { .. } => "unit.started",
            Self::UnitFinished { .. } => "unit.finished",
        }
    }

    /// Run the event belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunPaused { run_id, .. }
            | Self::RunResumed { run_id }
            | Self::RunFinished { run_id, .. }
            | Self::PhaseStarted { run_id, .. }
            | Self::PhaseFinished { run_id, .. }
            | Self::UnitStarted { run_id, .. }
            | Self::UnitFinished { run_id, .. } => run_id,
        }
    }

    /// Phase the event concerns, if any.
    #[must_use]
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::PhaseStarted { phase, .. }
            | Self::PhaseFinished { phase, .. }
            | Self::UnitStarted { phase, .. }
            | Self::UnitFinished { phase, .. } => Some(phase),
            _ => None,
        }
    }
}
