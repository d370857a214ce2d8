//! # Phaseflow
//!
//! A resumable executor for multi-phase autonomous workflows.
//!
//! A workflow is an ordered list of phases, each holding units of work with
//! declared dependencies. Phaseflow drives every unit to a terminal status
//! without human input:
//!
//! - **Dependency ordering**: stable topological order, with cycles broken
//!   instead of stalling the run
//! - **Bounded self-healing**: retries, then escalation (regenerate from
//!   upstream, conservative default, skip)
//! - **Durable progress**: the run is checkpointed after every transition and
//!   can be paused and resumed without re-executing finished units
//! - **Decision log**: every autonomous choice is recorded for review
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phaseflow::prelude::*;
//!
//! let config = WorkflowConfig::new("greenfield")
//!     .with_phase(PhaseDefinition::new("architecture").blocking().with_unit(UnitSpec::new("arch")))
//!     .with_phase(PhaseDefinition::new("stories").generative());
//!
//! let coordinator = WorkflowCoordinator::with_file_store(config, Arc::new(my_executor))?;
//! let summary = coordinator.start().await?;
//! println!("{}", serde_json::to_string_pretty(&summary)?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod control;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::WorkflowConfig;
    pub use crate::control::PauseToken;
    pub use crate::core::{
        Decision, DecisionChoice, DecisionScope, Outcome, OutcomeKind, PhaseDefinition,
        PhaseStatus, Remedy, Run, RunStatus, UnitSpec, UnitStatus,
    };
    pub use crate::errors::{CycleDetectedError, PhaseflowError, StoreCorruptError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, WorkflowEvent};
    pub use crate::executor::{FnTaskExecutor, TaskExecutor, TaskRequest};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        EscalationConfig, RetryConfig, RunSummary, WorkflowCoordinator,
    };
    pub use crate::store::{FileProgressStore, InMemoryProgressStore, ProgressStore};
    pub use crate::utils::{generate_uuid, Timestamp};
}
