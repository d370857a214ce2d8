//! Scripted executor for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::control::PauseToken;
use crate::core::{Outcome, UnitSpec};
use crate::executor::{TaskExecutor, TaskRequest};

/// An executor that replays per-unit outcome scripts and records calls.
///
/// Each call for a unit pops the next scripted outcome; once a script is
/// exhausted (or absent) the fallback outcome is returned.
#[derive(Debug)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    fallback: Outcome,
    discoveries: HashMap<String, Result<Vec<UnitSpec>, String>>,
    pause_after: HashMap<String, Arc<PauseToken>>,
    invocations: Mutex<Vec<TaskRequest>>,
    enumerations: Mutex<Vec<String>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    /// Creates an executor that succeeds for every unit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Outcome::success(),
            discoveries: HashMap::new(),
            pause_after: HashMap::new(),
            invocations: Mutex::new(Vec::new()),
            enumerations: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the outcomes for successive calls of one unit.
    #[must_use]
    pub fn with_script(
        self,
        unit_id: impl Into<String>,
        outcomes: impl IntoIterator<Item = Outcome>,
    ) -> Self {
        self.scripts
            .lock()
            .insert(unit_id.into(), outcomes.into_iter().collect());
        self
    }

    /// Sets the outcome used when no script applies.
    #[must_use]
    pub fn with_fallback(mut self, outcome: Outcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Sets the units a generative phase enumerates.
    #[must_use]
    pub fn with_discovery(mut self, phase: impl Into<String>, units: Vec<UnitSpec>) -> Self {
        self.discoveries.insert(phase.into(), Ok(units));
        self
    }

    /// Makes enumeration of a phase fail.
    #[must_use]
    pub fn with_discovery_error(mut self, phase: impl Into<String>, message: impl Into<String>) -> Self {
        self.discoveries.insert(phase.into(), Err(message.into()));
        self
    }

    /// Requests a pause on `token` once the unit's call returns.
    #[must_use]
    pub fn pause_after(mut self, unit_id: impl Into<String>, token: Arc<PauseToken>) -> Self {
        self.pause_after.insert(unit_id.into(), token);
        self
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<TaskRequest> {
        self.invocations.lock().clone()
    }

    /// Returns the unit id of every call, in order.
    #[must_use]
    pub fn invoked_units(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|r| r.unit_id.clone())
            .collect()
    }

    /// Returns the number of calls for one unit.
    #[must_use]
    pub fn call_count(&self, unit_id: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|r| r.unit_id == unit_id)
            .count()
    }

    /// Returns the phases enumerated so far, in order.
    #[must_use]
    pub fn enumerated_phases(&self) -> Vec<String> {
        self.enumerations.lock().clone()
    }

    /// Forgets recorded calls.
    pub fn reset(&self) {
        self.invocations.lock().clear();
        self.enumerations.lock().clear();
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, request: &TaskRequest) -> Outcome {
        self.invocations.lock().push(request.clone());
        let outcome = self
            .scripts
            .lock()
            .get_mut(&request.unit_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());
        if let Some(token) = self.pause_after.get(&request.unit_id) {
            token.request(format!("requested after unit '{}'", request.unit_id));
        }
        outcome
    }

    async fn discover_units(
        &self,
        phase: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<Vec<UnitSpec>> {
        self.enumerations.lock().push(phase.to_string());
        match self.discoveries.get(phase) {
            Some(Ok(units)) => Ok(units.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{message}")),
            None => Ok(Vec::new()),
        }
    }
}
