//! Core domain model types for phaseflow.
//!
//! This module contains the fundamental types used throughout the executor:
//! - Run, phase and unit status enums
//! - Run, phase and unit records
//! - Executor outcomes and remedies
//! - The decision ledger

mod decision;
mod model;
mod outcome;
mod status;

pub use decision::{Decision, DecisionChoice, DecisionLog, DecisionScope};
pub use model::{Phase, PhaseDefinition, ResumePointer, Run, Unit, UnitSpec};
pub use outcome::{Outcome, OutcomeKind, Remedy};
pub use status::{PhaseStatus, RunStatus, UnitStatus};
