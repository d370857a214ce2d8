//! Testing utilities for workflows.
//!
//! This module provides:
//! - A scripted task executor that records every invocation
//! - Assertions over run summaries

mod assertions;
mod mocks;

pub use assertions::{
    assert_decision_count, assert_phase_status, assert_run_status, assert_unit_attempts,
    assert_unit_status,
};
pub use mocks::ScriptedExecutor;
