//! The task executor seam.
//!
//! The executor is the external collaborator that performs the actual work
//! of a unit (authoring a story, reviewing it, generating tests). The core
//! never inspects unit-kind semantics: it only routes by declared
//! dependencies and phase membership.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

use crate::core::{Outcome, UnitSpec};

/// Context key holding the run id.
pub const CONTEXT_RUN_ID: &str = "run_id";
/// Context key holding the phase name.
pub const CONTEXT_PHASE: &str = "phase";
/// Context key holding the 1-based attempt number.
pub const CONTEXT_ATTEMPT: &str = "attempt";
/// Context key holding the unit's dependency ids.
pub const CONTEXT_DEPENDENCIES: &str = "dependencies";
/// Context key set on an upstream regeneration, naming the source of truth.
pub const CONTEXT_REGENERATE_FROM: &str = "regenerate_from";

/// One invocation of the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Routing name of the unit.
    pub unit_kind: String,
    /// Id of the unit.
    pub unit_id: String,
    /// Invocation context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl TaskRequest {
    /// Creates a request with an empty context.
    #[must_use]
    pub fn new(unit_kind: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self {
            unit_kind: unit_kind.into(),
            unit_id: unit_id.into(),
            context: HashMap::new(),
        }
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Returns the 1-based attempt number, if present.
    #[must_use]
    pub fn attempt(&self) -> Option<u64> {
        self.context.get(CONTEXT_ATTEMPT).and_then(serde_json::Value::as_u64)
    }

    /// Returns the source-of-truth artifact for an upstream regeneration.
    #[must_use]
    pub fn regenerate_from(&self) -> Option<&str> {
        self.context
            .get(CONTEXT_REGENERATE_FROM)
            .and_then(serde_json::Value::as_str)
    }
}

/// Runs one named unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes a unit and classifies the result.
    ///
    /// Implementations report problems through the returned `Outcome`
    /// instead of panicking.
    async fn execute(&self, request: &TaskRequest) -> Outcome;

    /// Enumerates the units of a generative phase before it starts.
    ///
    /// The default finds nothing.
    async fn discover_units(
        &self,
        _phase: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<Vec<UnitSpec>> {
        Ok(Vec::new())
    }
}

/// A simple function-based executor.
pub struct FnTaskExecutor<F>
where
    F: Fn(&TaskRequest) -> Outcome + Send + Sync,
{
    func: F,
}

impl<F> FnTaskExecutor<F>
where
    F: Fn(&TaskRequest) -> Outcome + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnTaskExecutor<F>
where
    F: Fn(&TaskRequest) -> Outcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTaskExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> TaskExecutor for FnTaskExecutor<F>
where
    F: Fn(&TaskRequest) -> Outcome + Send + Sync,
{
    async fn execute(&self, request: &TaskRequest) -> Outcome {
        (self.func)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_executor_routes_by_kind() {
        let executor = FnTaskExecutor::new(|req: &TaskRequest| {
            if req.unit_kind == "review" {
                Outcome::recoverable("needs changes")
            } else {
                Outcome::success()
            }
        });

        let out = executor.execute(&TaskRequest::new("story", "s1")).await;
        assert!(out.is_success());

        let out = executor.execute(&TaskRequest::new("review", "r1")).await;
        assert!(!out.is_success());
    }

    #[test]
    fn test_default_discovery_is_empty() {
        let executor = FnTaskExecutor::new(|_req: &TaskRequest| Outcome::success());
        let found = tokio_test::block_on(executor.discover_units("stories", &HashMap::new())).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_request_context_accessors() {
        let req = TaskRequest::new("story", "s1")
            .with_context(CONTEXT_ATTEMPT, serde_json::json!(2))
            .with_context(CONTEXT_REGENERATE_FROM, serde_json::json!("epic.md"));
        assert_eq!(req.attempt(), Some(2));
        assert_eq!(req.regenerate_from(), Some("epic.md"));
    }
}
