//! Workflow execution.
//!
//! This module provides:
//! - Dependency resolution with cycle breaking
//! - Retry and escalation policy
//! - The phase runner and run coordinator
//! - Run summaries

mod coordinator;
mod phase_runner;
mod resolver;
mod retry;
mod summary;

#[cfg(test)]
mod integration_tests;

pub use coordinator::WorkflowCoordinator;
pub use phase_runner::{PhaseRunResult, PhaseRunner};
pub use resolver::{DependencyResolver, Resolution};
pub use retry::{
    BackoffStrategy, EscalationConfig, JitterStrategy, RetryConfig, RetryDecision, RetryPolicy,
};
pub use summary::{PhaseSummary, RunSummary, UnitSummary, UnresolvedIssue};
