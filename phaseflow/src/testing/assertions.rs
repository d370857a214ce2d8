//! Test assertions for run summaries.

use crate::core::{DecisionChoice, PhaseStatus, RunStatus, UnitStatus};
use crate::pipeline::RunSummary;

/// Asserts the run's status.
pub fn assert_run_status(summary: &RunSummary, expected: RunStatus) {
    assert_eq!(
        summary.status, expected,
        "Expected run status {expected}, got {}. Unresolved: {:?}",
        summary.status, summary.unresolved_issues
    );
}

/// Asserts a phase's status.
pub fn assert_phase_status(summary: &RunSummary, phase: &str, expected: PhaseStatus) {
    let actual = summary
        .phases
        .iter()
        .find(|p| p.name == phase)
        .map(|p| p.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected phase '{phase}' to be {expected}, got {actual:?}"
    );
}

/// Asserts a unit's status.
pub fn assert_unit_status(summary: &RunSummary, unit: &str, expected: UnitStatus) {
    let actual = summary.unit(unit).map(|u| u.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected unit '{unit}' to be {expected}, got {actual:?}"
    );
}

/// Asserts how many times a unit was attempted.
pub fn assert_unit_attempts(summary: &RunSummary, unit: &str, expected: u32) {
    let actual = summary.unit(unit).map(|u| u.attempts);
    assert_eq!(
        actual,
        Some(expected),
        "Expected unit '{unit}' to have {expected} attempts, got {actual:?}"
    );
}

/// Asserts how many decisions of one choice were recorded.
pub fn assert_decision_count(summary: &RunSummary, choice: DecisionChoice, expected: usize) {
    let actual = summary.decisions.iter().filter(|d| d.choice == choice).count();
    assert_eq!(
        actual, expected,
        "Expected {expected} '{choice}' decisions, got {actual}"
    );
}
