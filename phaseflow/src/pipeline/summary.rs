//! Structured report of a run, returned by start and resume.

use serde::{Deserialize, Serialize};

use crate::core::{
    Decision, DecisionChoice, DecisionScope, PhaseStatus, ResumePointer, Run, RunStatus,
    UnitStatus,
};

/// Status of one phase in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    /// Phase name.
    pub name: String,
    /// Phase status.
    pub status: PhaseStatus,
}

/// Status of one unit in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Unit id.
    pub id: String,
    /// Owning phase.
    pub phase: String,
    /// Unit status.
    pub status: UnitStatus,
    /// Executor invocations made.
    pub attempts: u32,
}

/// Something an operator should review after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedIssue {
    /// What the issue concerns.
    pub scope: DecisionScope,
    /// The decision that raised it.
    pub choice: DecisionChoice,
    /// Why.
    pub detail: String,
}

/// Report of a run's final (or paused) state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id.
    pub run_id: String,
    /// Workflow kind.
    pub workflow_kind: String,
    /// Run status.
    pub status: RunStatus,
    /// Phases in order.
    pub phases: Vec<PhaseSummary>,
    /// Units in phase order.
    pub units: Vec<UnitSummary>,
    /// The full decision log.
    pub decisions: Vec<Decision>,
    /// Percentage of units completed.
    pub completion_percentage: f64,
    /// Skips, failures, defaults, and broken cycles.
    pub unresolved_issues: Vec<UnresolvedIssue>,
    /// Where a paused run will continue.
    pub resume_from: Option<ResumePointer>,
}

impl RunSummary {
    /// Builds a summary from a run.
    #[must_use]
    pub fn from_run(run: &Run) -> Self {
        let phases = run
            .phases
            .iter()
            .map(|p| PhaseSummary {
                name: p.name.clone(),
                status: p.status,
            })
            .collect();
        let units = run
            .phases
            .iter()
            .flat_map(|p| {
                p.units.iter().map(move |u| UnitSummary {
                    id: u.id.clone(),
                    phase: p.name.clone(),
                    status: u.status,
                    attempts: u.attempt_count,
                })
            })
            .collect();
        let unresolved_issues = run
            .decisions
            .entries()
            .iter()
            .filter(|d| d.choice.is_concern())
            .map(|d| UnresolvedIssue {
                scope: d.scope.clone(),
                choice: d.choice,
                detail: d.rationale.clone(),
            })
            .collect();

        Self {
            run_id: run.run_id.clone(),
            workflow_kind: run.workflow_kind.clone(),
            status: run.status,
            phases,
            units,
            decisions: run.decisions.entries().to_vec(),
            completion_percentage: run.completion_percentage,
            unresolved_issues,
            resume_from: run.resume_from.clone(),
        }
    }

    /// Returns a unit's entry.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&UnitSummary> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Returns true if any issue mentions the unit.
    #[must_use]
    pub fn has_issue_for_unit(&self, id: &str) -> bool {
        self.unresolved_issues
            .iter()
            .any(|i| matches!(&i.scope, DecisionScope::Unit(u) if u == id))
    }

    /// Returns the number of units in a status.
    #[must_use]
    pub fn count_units(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}
