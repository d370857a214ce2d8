//! Append-only ledger of autonomous decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{now_utc, Timestamp};

/// What a decision applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum DecisionScope {
    /// The whole run.
    Run(String),
    /// A phase, by name.
    Phase(String),
    /// A unit, by id.
    Unit(String),
}

impl fmt::Display for DecisionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(id) => write!(f, "run:{id}"),
            Self::Phase(name) => write!(f, "phase:{name}"),
            Self::Unit(id) => write!(f, "unit:{id}"),
        }
    }
}

/// The choice that was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionChoice {
    /// A unit attempt succeeded.
    Succeeded,
    /// Escalation substituted a documented default.
    SucceededWithDefault,
    /// A recoverable failure will be retried.
    Retry,
    /// Escalation regenerates the attempt from its source of truth.
    RegenerateFromUpstream,
    /// A unit was skipped.
    Skipped,
    /// A unit failed fatally.
    Failed,
    /// A dependency cycle was broken by clearing dependencies.
    CycleBroken,
    /// New units were appended to a generative phase.
    UnitsDiscovered,
    /// A non-terminal unit before the resume pointer was re-queued.
    Requeued,
    /// A phase finished with every unit terminal.
    PhaseCompleted,
    /// A phase failed.
    PhaseFailed,
    /// An optional phase was skipped.
    PhaseSkipped,
    /// The run paused at a unit boundary.
    RunPaused,
    /// The run resumed from a checkpoint.
    RunResumed,
    /// The run completed.
    RunCompleted,
    /// The run failed because a blocking phase failed.
    RunFailed,
}

impl fmt::Display for DecisionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::SucceededWithDefault => "succeeded_with_default",
            Self::Retry => "retry",
            Self::RegenerateFromUpstream => "regenerate_from_upstream",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::CycleBroken => "cycle_broken",
            Self::UnitsDiscovered => "units_discovered",
            Self::Requeued => "requeued",
            Self::PhaseCompleted => "phase_completed",
            Self::PhaseFailed => "phase_failed",
            Self::PhaseSkipped => "phase_skipped",
            Self::RunPaused => "run_paused",
            Self::RunResumed => "run_resumed",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
        };
        write!(f, "{s}")
    }
}

impl DecisionChoice {
    /// Returns true if the choice leaves something an operator should review.
    #[must_use]
    pub fn is_concern(&self) -> bool {
        matches!(
            self,
            Self::SucceededWithDefault
                | Self::Skipped
                | Self::Failed
                | Self::CycleBroken
                | Self::PhaseFailed
                | Self::PhaseSkipped
                | Self::RunFailed
        )
    }
}

/// An immutable audit record of one autonomous choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Position in the log.
    pub sequence: u64,
    /// When the decision was made.
    pub timestamp: Timestamp,
    /// What the decision applies to.
    pub scope: DecisionScope,
    /// The choice made.
    pub choice: DecisionChoice,
    /// Human-readable reason.
    pub rationale: String,
    /// Status of the scope after the decision.
    pub resulting_status: String,
}

/// Append-only decision ledger.
///
/// Timestamps never go backwards: an entry is stamped with the later of the
/// wall clock and the previous entry's timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionLog {
    entries: Vec<Decision>,
}

impl DecisionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a decision and returns it.
    pub fn append(
        &mut self,
        scope: DecisionScope,
        choice: DecisionChoice,
        rationale: impl Into<String>,
        resulting_status: impl ToString,
    ) -> &Decision {
        let now = now_utc();
        let timestamp = self.entries.last().map_or(now, |last| last.timestamp.max(now));
        let decision = Decision {
            sequence: self.entries.len() as u64,
            timestamp,
            scope,
            choice,
            rationale: rationale.into(),
            resulting_status: resulting_status.to_string(),
        };
        tracing::debug!(
            scope = %decision.scope,
            choice = %decision.choice,
            status = %decision.resulting_status,
            "{}",
            decision.rationale
        );
        self.entries.push(decision);
        &self.entries[self.entries.len() - 1]
    }

    /// Returns all decisions in order.
    #[must_use]
    pub fn entries(&self) -> &[Decision] {
        &self.entries
    }

    /// Returns the number of decisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was decided yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns decisions for one unit.
    pub fn for_unit<'a>(&'a self, unit_id: &'a str) -> impl Iterator<Item = &'a Decision> + 'a {
        self.entries
            .iter()
            .filter(move |d| matches!(&d.scope, DecisionScope::Unit(id) if id == unit_id))
    }

    /// Counts decisions of one choice.
    #[must_use]
    pub fn count_of(&self, choice: DecisionChoice) -> usize {
        self.entries.iter().filter(|d| d.choice == choice).count()
    }

    /// Checks the ordering invariant of a loaded log.
    pub fn check_ordering(&self) -> Result<(), String> {
        for (idx, pair) in self.entries.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(format!("decision {} is older than its predecessor", idx + 1));
            }
        }
        for (idx, decision) in self.entries.iter().enumerate() {
            if decision.sequence != idx as u64 {
                return Err(format!(
                    "decision at position {idx} has sequence {}",
                    decision.sequence
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_sequence_and_ordered_timestamps() {
        let mut log = DecisionLog::new();
        log.append(DecisionScope::Unit("a".into()), DecisionChoice::Retry, "flaky", "pending");
        log.append(DecisionScope::Unit("a".into()), DecisionChoice::Succeeded, "ok", "completed");
        log.append(DecisionScope::Phase("build".into()), DecisionChoice::PhaseCompleted, "done", "completed");

        assert_eq!(log.len(), 3);
        let seqs: Vec<u64> = log.entries().iter().map(|d| d.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(log.check_ordering().is_ok());
    }

    #[test]
    fn test_for_unit_and_count_of() {
        let mut log = DecisionLog::new();
        log.append(DecisionScope::Unit("a".into()), DecisionChoice::Retry, "r", "pending");
        log.append(DecisionScope::Unit("b".into()), DecisionChoice::Succeeded, "s", "completed");
        log.append(DecisionScope::Unit("a".into()), DecisionChoice::Succeeded, "s", "completed");

        assert_eq!(log.for_unit("a").count(), 2);
        assert_eq!(log.count_of(DecisionChoice::Succeeded), 2);
    }

    #[test]
    fn test_check_ordering_rejects_bad_sequence() {
        let mut log = DecisionLog::new();
        log.append(DecisionScope::Run("r".into()), DecisionChoice::RunResumed, "x", "in_progress");
        let mut json = serde_json::to_value(&log).unwrap();
        json[0]["sequence"] = serde_json::json!(7);
        let tampered: DecisionLog = serde_json::from_value(json).unwrap();
        assert!(tampered.check_ordering().is_err());
    }

    #[test]
    fn test_scope_display_and_concerns() {
        assert_eq!(DecisionScope::Unit("u1".into()).to_string(), "unit:u1");
        assert!(DecisionChoice::Skipped.is_concern());
        assert!(DecisionChoice::SucceededWithDefault.is_concern());
        assert!(!DecisionChoice::Succeeded.is_concern());
    }
}
