//! Run, phase and unit records.
//!
//! A `Run` is the whole persisted state of one workflow execution. It is
//! owned by the coordinator and mutated in memory, then written through the
//! progress store as a single record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::{DecisionLog, PhaseStatus, RunStatus, UnitStatus};
use crate::utils::{generate_uuid, now_utc, Timestamp};

fn default_unit_kind() -> String {
    "unit".to_string()
}

fn default_true() -> bool {
    true
}

/// Declaration of a unit, as found in configuration or discovered by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unique id within the phase.
    pub id: String,
    /// Human-readable name. Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Routing name passed to the executor.
    #[serde(default = "default_unit_kind")]
    pub kind: String,
    /// Ids this unit depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether a fatal failure of this unit may be absorbed by the phase.
    #[serde(default = "default_true")]
    pub skippable: bool,
}

impl UnitSpec {
    /// Creates a unit spec with default kind and no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: default_unit_kind(),
            dependencies: Vec::new(),
            skippable: true,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the executor routing kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Marks the unit as required: a fatal failure fails the phase.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.skippable = false;
        self
    }
}

/// One recursively schedulable item of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unique id within the phase.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Routing name passed to the executor.
    pub kind: String,
    /// Current status.
    pub status: UnitStatus,
    /// Ids this unit depends on.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Executor invocations so far, including an upstream regeneration.
    #[serde(default)]
    pub attempt_count: u32,
    /// Last failure diagnostic.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Whether a fatal failure may be absorbed by the phase.
    #[serde(default = "default_true")]
    pub skippable: bool,
    /// Whether the one-time upstream regeneration was spent.
    #[serde(default)]
    pub upstream_used: bool,
    /// Default substituted by escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// When the unit first started.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the unit reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl Unit {
    /// Creates a pending unit from its spec.
    #[must_use]
    pub fn from_spec(spec: &UnitSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
            kind: spec.kind.clone(),
            status: UnitStatus::Pending,
            dependencies: spec.dependencies.iter().cloned().collect(),
            attempt_count: 0,
            last_error: None,
            skippable: spec.skippable,
            upstream_used: false,
            default_value: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns true if the unit reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Puts a non-terminal unit back in the queue.
    pub fn requeue(&mut self) {
        self.status = UnitStatus::Pending;
    }
}

/// Declared properties of a phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    /// Phase name, unique within the workflow.
    pub name: String,
    /// A failure of this phase halts the run.
    #[serde(default)]
    pub blocking: bool,
    /// The phase may be skipped when it has no units.
    #[serde(default)]
    pub optional: bool,
    /// Units may be discovered while the phase executes.
    #[serde(default)]
    pub generative: bool,
    /// Units known up front.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

impl PhaseDefinition {
    /// Creates a phase definition with no units.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Marks the phase as blocking.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Marks the phase as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the phase as generative.
    #[must_use]
    pub fn generative(mut self) -> Self {
        self.generative = true;
        self
    }

    /// Adds a unit.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitSpec) -> Self {
        self.units.push(unit);
        self
    }
}

/// One ordered stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name.
    pub name: String,
    /// Current status.
    pub status: PhaseStatus,
    /// A failure of this phase halts the run.
    #[serde(default)]
    pub blocking: bool,
    /// The phase may be skipped when it has no units.
    #[serde(default)]
    pub optional: bool,
    /// Units may be discovered while the phase executes.
    #[serde(default)]
    pub generative: bool,
    /// Whether the executor enumeration already ran.
    #[serde(default)]
    pub enumerated: bool,
    /// When the phase started.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the phase reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    /// Units in declaration order.
    #[serde(default)]
    pub units: Vec<Unit>,
    /// Artifact identifiers produced by the phase's units.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl Phase {
    /// Creates a pending phase from its definition.
    #[must_use]
    pub fn from_definition(def: &PhaseDefinition) -> Self {
        let mut phase = Self {
            name: def.name.clone(),
            status: PhaseStatus::Pending,
            blocking: def.blocking,
            optional: def.optional,
            generative: def.generative,
            enumerated: false,
            started_at: None,
            completed_at: None,
            units: Vec::new(),
            artifacts: Vec::new(),
        };
        for spec in &def.units {
            phase.add_unit(spec);
        }
        phase
    }

    /// Appends a unit unless its id is already present.
    pub fn add_unit(&mut self, spec: &UnitSpec) -> bool {
        if self.unit_index(&spec.id).is_some() {
            return false;
        }
        self.units.push(Unit::from_spec(spec));
        true
    }

    /// Returns the position of a unit.
    #[must_use]
    pub fn unit_index(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }

    /// Returns a unit by id.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Returns a mutable unit by id.
    pub fn unit_mut(&mut self, id: &str) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    /// Returns true if every unit is terminal.
    #[must_use]
    pub fn all_units_terminal(&self) -> bool {
        self.units.iter().all(Unit::is_terminal)
    }

    /// Returns the first failed unit that the phase cannot absorb.
    #[must_use]
    pub fn unabsorbed_failure(&self) -> Option<&Unit> {
        self.units
            .iter()
            .find(|u| u.status == UnitStatus::Failed && !u.skippable)
    }

    /// Records an artifact once.
    pub fn add_artifact(&mut self, artifact: &str) {
        if !self.artifacts.iter().any(|a| a == artifact) {
            self.artifacts.push(artifact.to_string());
        }
    }
}

/// Where a paused or interrupted run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePointer {
    /// Phase to continue.
    pub phase_index: usize,
    /// Position of the next unit in the phase's execution order.
    pub unit_index: usize,
    /// Id of the next unit, if any remained.
    #[serde(default)]
    pub unit_id: Option<String>,
    /// Why the run stopped.
    pub reason: String,
}

/// One workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run id.
    pub run_id: String,
    /// The workflow type.
    pub workflow_kind: String,
    /// When the run was created.
    pub started_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
    /// Overall status.
    pub status: RunStatus,
    /// Ordered phases.
    pub phases: Vec<Phase>,
    /// Index of the phase being executed.
    pub current_phase_index: usize,
    /// Completed units over total units, in percent.
    #[serde(default)]
    pub completion_percentage: f64,
    /// Set while paused.
    #[serde(default)]
    pub resume_from: Option<ResumePointer>,
    /// Audit trail.
    #[serde(default)]
    pub decisions: DecisionLog,
}

impl Run {
    /// Creates a new in-progress run.
    #[must_use]
    pub fn new(workflow_kind: impl Into<String>, definitions: &[PhaseDefinition]) -> Self {
        let now = now_utc();
        Self {
            run_id: generate_uuid().to_string(),
            workflow_kind: workflow_kind.into(),
            started_at: now,
            updated_at: now,
            status: RunStatus::InProgress,
            phases: definitions.iter().map(Phase::from_definition).collect(),
            current_phase_index: 0,
            completion_percentage: 0.0,
            resume_from: None,
            decisions: DecisionLog::new(),
        }
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_utc().max(self.updated_at);
    }

    /// Total number of units across phases.
    #[must_use]
    pub fn total_units(&self) -> usize {
        self.phases.iter().map(|p| p.units.len()).sum()
    }

    /// Number of completed units across phases.
    #[must_use]
    pub fn completed_units(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|p| &p.units)
            .filter(|u| u.status == UnitStatus::Completed)
            .count()
    }

    /// Completed units over total units, in percent.
    #[must_use]
    pub fn measured_completion(&self) -> f64 {
        let total = self.total_units();
        if total == 0 {
            return if self.status == RunStatus::Completed { 100.0 } else { 0.0 };
        }
        self.completed_units() as f64 * 100.0 / total as f64
    }

    /// Recomputes `completion_percentage`.
    ///
    /// While the run is in progress the value never decreases, even when
    /// discovered units grow the denominator.
    pub fn refresh_completion(&mut self) {
        let measured = self.measured_completion();
        self.completion_percentage = if self.status == RunStatus::InProgress {
            self.completion_percentage.max(measured)
        } else {
            measured
        };
    }

    /// Structural validation used when loading a persisted record.
    pub fn validate(&self) -> Result<(), String> {
        if self.run_id.is_empty() {
            return Err("run id is empty".to_string());
        }
        if self.current_phase_index > self.phases.len() {
            return Err(format!(
                "current phase index {} exceeds {} phases",
                self.current_phase_index,
                self.phases.len()
            ));
        }
        if !(0.0..=100.0).contains(&self.completion_percentage) {
            return Err(format!(
                "completion percentage {} out of range",
                self.completion_percentage
            ));
        }
        let mut phase_names = HashSet::new();
        for phase in &self.phases {
            if !phase_names.insert(phase.name.as_str()) {
                return Err(format!("duplicate phase '{}'", phase.name));
            }
            let mut unit_ids = HashSet::new();
            for unit in &phase.units {
                if !unit_ids.insert(unit.id.as_str()) {
                    return Err(format!(
                        "duplicate unit '{}' in phase '{}'",
                        unit.id, phase.name
                    ));
                }
            }
        }
        match (&self.status, &self.resume_from) {
            (RunStatus::Paused, None) => {
                return Err("paused run has no resume pointer".to_string());
            }
            (_, Some(pointer)) => {
                if pointer.phase_index > self.phases.len() {
                    return Err(format!(
                        "resume pointer phase {} out of range",
                        pointer.phase_index
                    ));
                }
                if let Some(phase) = self.phases.get(pointer.phase_index) {
                    if pointer.unit_index > phase.units.len() {
                        return Err(format!(
                            "resume pointer unit {} out of range for phase '{}'",
                            pointer.unit_index, phase.name
                        ));
                    }
                }
            }
            _ => {}
        }
        self.decisions.check_ordering()
    }
}
