//! Execution of a single phase.
//!
//! The runner drives every unit of one phase to a terminal status: it
//! enumerates generative phases, orders units by dependency, applies the
//! retry policy to each outcome, and checkpoints after every transition.
//! Pause requests are honoured only at unit boundaries.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::resolver::DependencyResolver;
use super::retry::{RetryDecision, RetryPolicy};
use crate::control::PauseToken;
use crate::core::{
    DecisionChoice, DecisionScope, Outcome, PhaseStatus, ResumePointer, Run, Unit, UnitStatus,
};
use crate::errors::PhaseflowError;
use crate::events::{EventSink, NoOpEventSink, WorkflowEvent};
use crate::executor::{
    TaskExecutor, TaskRequest, CONTEXT_ATTEMPT, CONTEXT_DEPENDENCIES, CONTEXT_PHASE,
    CONTEXT_REGENERATE_FROM, CONTEXT_RUN_ID,
};
use crate::store::ProgressStore;
use crate::utils::now_utc;

/// How a call to [`PhaseRunner::run_phase`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseRunResult {
    /// The phase reached a terminal status.
    Finished(PhaseStatus),
    /// A pause was requested; execution stopped before the pointed-to unit.
    Paused(ResumePointer),
}

/// Runs the units of one phase against a task executor.
pub struct PhaseRunner {
    executor: Arc<dyn TaskExecutor>,
    store: Arc<dyn ProgressStore>,
    policy: Arc<RetryPolicy>,
    resolver: DependencyResolver,
    events: Arc<dyn EventSink>,
    pause: Arc<PauseToken>,
    context: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("policy", &self.policy)
            .field("pause", &self.pause)
            .field("context_keys", &self.context.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PhaseRunner {
    /// Creates a runner with no event sink and a fresh pause token.
    #[must_use]
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        store: Arc<dyn ProgressStore>,
        policy: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            executor,
            store,
            policy,
            resolver: DependencyResolver::new(),
            events: Arc::new(NoOpEventSink),
            pause: Arc::new(PauseToken::new()),
            context: HashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a pause token with the caller.
    #[must_use]
    pub fn with_pause_token(mut self, pause: Arc<PauseToken>) -> Self {
        self.pause = pause;
        self
    }

    /// Sets context passed to every executor call.
    #[must_use]
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// Returns the pause token checked before each unit.
    #[must_use]
    pub fn pause_token(&self) -> &Arc<PauseToken> {
        &self.pause
    }

    /// Drives the phase at `phase_index` until it is terminal or paused.
    ///
    /// Errors are infrastructure failures (progress store, bad index); unit
    /// failures are expressed through unit and phase statuses.
    pub async fn run_phase(
        &self,
        run: &mut Run,
        phase_index: usize,
    ) -> Result<PhaseRunResult, PhaseflowError> {
        let phase = run.phases.get_mut(phase_index).ok_or_else(|| {
            PhaseflowError::Internal(format!("phase index {phase_index} out of range"))
        })?;
        if phase.status.is_terminal() {
            return Ok(PhaseRunResult::Finished(phase.status));
        }
        if self.pause.is_requested() {
            return Ok(PhaseRunResult::Paused(self.next_pointer(run, phase_index)));
        }
        let phase = &mut run.phases[phase_index];
        if phase.status == PhaseStatus::Pending {
            phase.status = PhaseStatus::Running;
            phase.started_at = Some(now_utc());
            let (name, unit_count) = (phase.name.clone(), phase.units.len());
            info!(run_id = %run.run_id, phase = %name, units = unit_count, "Phase started");
            self.events.publish(&WorkflowEvent::PhaseStarted {
                run_id: run.run_id.clone(),
                phase: name,
            });
            self.checkpoint(run).await?;
        }

        if let Some(status) = self.enumerate(run, phase_index).await? {
            return Ok(PhaseRunResult::Finished(status));
        }

        let phase = &run.phases[phase_index];
        if phase.units.is_empty() && phase.optional {
            let status = self
                .finish_phase(run, phase_index, PhaseStatus::Skipped, "optional phase has no units")
                .await?;
            return Ok(PhaseRunResult::Finished(status));
        }

        // Re-resolve every round: successful units may append new ones.
        loop {
            let order = self.order_units(run, phase_index);
            let phase = &run.phases[phase_index];
            let next = order
                .into_iter()
                .find(|id| phase.unit(id).is_some_and(|u| !u.is_terminal()));
            let Some(next) = next else {
                break;
            };
            if let Some(pointer) = self.run_unit(run, phase_index, &next).await? {
                return Ok(PhaseRunResult::Paused(pointer));
            }
        }

        let phase = &run.phases[phase_index];
        let (status, rationale) = match phase.unabsorbed_failure() {
            Some(unit) => (
                PhaseStatus::Failed,
                format!("required unit '{}' failed", unit.id),
            ),
            None => (PhaseStatus::Completed, completion_rationale(&phase.units)),
        };
        let status = self.finish_phase(run, phase_index, status, rationale).await?;
        Ok(PhaseRunResult::Finished(status))
    }

    /// Runs one unit, first running any non-terminal dependencies it has.
    ///
    /// Returns a resume pointer if a pause was requested before one of the
    /// units could start.
    pub async fn run_unit(
        &self,
        run: &mut Run,
        phase_index: usize,
        unit_id: &str,
    ) -> Result<Option<ResumePointer>, PhaseflowError> {
        for id in self.dependency_plan(run, phase_index, unit_id)? {
            if self.pause.is_requested() {
                return Ok(Some(self.resume_pointer(run, phase_index, &id)));
            }
            self.execute_unit(run, phase_index, &id).await?;
        }
        Ok(None)
    }

    /// Returns `unit_id` preceded by its non-terminal dependency closure, in
    /// execution order.
    fn dependency_plan(
        &self,
        run: &mut Run,
        phase_index: usize,
        unit_id: &str,
    ) -> Result<Vec<String>, PhaseflowError> {
        let order = self.order_units(run, phase_index);
        let phase = &run.phases[phase_index];
        if phase.unit(unit_id).is_none() {
            return Err(PhaseflowError::Internal(format!(
                "unit '{unit_id}' is not part of phase '{}'",
                phase.name
            )));
        }

        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack = vec![unit_id];
        while let Some(id) = stack.pop() {
            let Some(unit) = phase.unit(id) else {
                continue;
            };
            if unit.is_terminal() || !needed.insert(unit.id.as_str()) {
                continue;
            }
            stack.extend(unit.dependencies.iter().map(String::as_str));
        }

        Ok(order
            .iter()
            .filter(|id| needed.contains(id.as_str()))
            .cloned()
            .collect())
    }

    /// Resolves the phase order, clearing the dependencies of cycle members.
    fn order_units(&self, run: &mut Run, phase_index: usize) -> Vec<String> {
        let resolution = self.resolver.resolve_units(&run.phases[phase_index].units);
        let phase = &mut run.phases[phase_index];
        let phase_name = phase.name.clone();
        for id in resolution.demoted() {
            if let Some(unit) = phase.unit_mut(id) {
                unit.dependencies.clear();
            }
        }
        for cycle in &resolution.broken_cycles {
            run.decisions.append(
                DecisionScope::Phase(phase_name.clone()),
                DecisionChoice::CycleBroken,
                format!(
                    "dependency cycle [{}] broken; members run as independent units",
                    cycle.cycle.join(", ")
                ),
                PhaseStatus::Running,
            );
        }
        resolution.order
    }

    /// Consults the executor once for a generative phase's unit list.
    ///
    /// Returns the phase status if enumeration failed and ended the phase.
    async fn enumerate(
        &self,
        run: &mut Run,
        phase_index: usize,
    ) -> Result<Option<PhaseStatus>, PhaseflowError> {
        let phase = &run.phases[phase_index];
        if !phase.generative || phase.enumerated {
            return Ok(None);
        }
        let phase_name = phase.name.clone();
        let mut context = self.context.clone();
        context.insert(CONTEXT_RUN_ID.to_string(), json!(run.run_id));
        context.insert(CONTEXT_PHASE.to_string(), json!(phase_name));

        match self.executor.discover_units(&phase_name, &context).await {
            Ok(specs) => {
                let phase = &mut run.phases[phase_index];
                phase.enumerated = true;
                let added: Vec<String> = specs
                    .iter()
                    .filter(|spec| phase.add_unit(spec))
                    .map(|spec| spec.id.clone())
                    .collect();
                if !added.is_empty() {
                    run.decisions.append(
                        DecisionScope::Phase(phase_name),
                        DecisionChoice::UnitsDiscovered,
                        format!("enumerated {} units: {}", added.len(), added.join(", ")),
                        PhaseStatus::Running,
                    );
                }
                self.checkpoint(run).await?;
                Ok(None)
            }
            Err(err) => {
                let err = PhaseflowError::from(err);
                warn!(run_id = %run.run_id, phase = %phase_name, error = %err, "Unit enumeration failed");
                run.phases[phase_index].enumerated = true;
                let pending: Vec<String> = run.phases[phase_index]
                    .units
                    .iter()
                    .filter(|u| !u.is_terminal())
                    .map(|u| u.id.clone())
                    .collect();
                for id in pending {
                    if let Some(unit) = run.phases[phase_index].unit_mut(&id) {
                        unit.status = UnitStatus::Skipped;
                        unit.completed_at = Some(now_utc());
                    }
                    run.decisions.append(
                        DecisionScope::Unit(id),
                        DecisionChoice::Skipped,
                        "phase enumeration failed",
                        UnitStatus::Skipped,
                    );
                }
                let status = self
                    .finish_phase(
                        run,
                        phase_index,
                        PhaseStatus::Failed,
                        format!("unit enumeration failed: {err}"),
                    )
                    .await?;
                Ok(Some(status))
            }
        }
    }

    /// Executes one unit with retries and escalation until it is terminal.
    async fn execute_unit(
        &self,
        run: &mut Run,
        phase_index: usize,
        unit_id: &str,
    ) -> Result<(), PhaseflowError> {
        let run_id = run.run_id.clone();
        let phase = &run.phases[phase_index];
        let phase_name = phase.name.clone();
        let idx = phase.unit_index(unit_id).ok_or_else(|| {
            PhaseflowError::Internal(format!("unit '{unit_id}' is not part of phase '{phase_name}'"))
        })?;
        let unit = &phase.units[idx];
        if unit.is_terminal() {
            return Ok(());
        }

        let mut failed_dep = None;
        for dep in &unit.dependencies {
            let Some(dep_unit) = phase.unit(dep) else {
                continue;
            };
            match dep_unit.status {
                UnitStatus::Failed => {
                    failed_dep = Some(dep.clone());
                    break;
                }
                status if status.satisfies_dependents() => {}
                status => {
                    return Err(PhaseflowError::Internal(format!(
                        "unit '{unit_id}' scheduled before dependency '{dep}' ({status})"
                    )));
                }
            }
        }
        if let Some(dep) = failed_dep {
            let unit = &mut run.phases[phase_index].units[idx];
            unit.status = UnitStatus::Skipped;
            unit.completed_at = Some(now_utc());
            run.decisions.append(
                DecisionScope::Unit(unit_id.to_string()),
                DecisionChoice::Skipped,
                format!("dependency '{dep}' failed"),
                UnitStatus::Skipped,
            );
            return self.unit_finished(run, phase_index, idx).await;
        }

        let unit = &mut run.phases[phase_index].units[idx];
        unit.status = UnitStatus::Running;
        unit.started_at.get_or_insert_with(now_utc);
        info!(run_id = %run_id, phase = %phase_name, unit = %unit_id, "Unit started");
        self.events.publish(&WorkflowEvent::UnitStarted {
            run_id: run_id.clone(),
            phase: phase_name.clone(),
            unit: unit_id.to_string(),
        });
        self.checkpoint(run).await?;

        let mut regenerate_from: Option<String> = None;
        loop {
            let unit = &mut run.phases[phase_index].units[idx];
            unit.attempt_count += 1;
            let request = self.build_request(&run_id, &phase_name, unit, regenerate_from.as_deref());
            debug!(unit = %unit_id, attempt = unit.attempt_count, "Invoking executor");

            let outcome = self.executor.execute(&request).await;
            let decision = self.policy.decide(&run.phases[phase_index].units[idx], &outcome);
            if outcome.is_success() {
                self.absorb_outputs(run, phase_index, unit_id, &outcome);
            }

            let scope = DecisionScope::Unit(unit_id.to_string());
            let unit = &mut run.phases[phase_index].units[idx];
            let attempt = unit.attempt_count;
            match decision {
                RetryDecision::Succeeded => {
                    unit.status = UnitStatus::Completed;
                    unit.last_error = None;
                    run.decisions.append(
                        scope,
                        DecisionChoice::Succeeded,
                        format!("succeeded on attempt {attempt}"),
                        UnitStatus::Completed,
                    );
                    break;
                }
                RetryDecision::Retry(delay) => {
                    unit.last_error = outcome.to_error(unit_id).map(|e| e.to_string());
                    run.decisions.append(
                        scope,
                        DecisionChoice::Retry,
                        format!(
                            "attempt {attempt} failed: {}; retrying",
                            outcome.diagnostic_or_default()
                        ),
                        UnitStatus::Running,
                    );
                    self.checkpoint(run).await?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryDecision::RegenerateFromUpstream(source) => {
                    unit.upstream_used = true;
                    unit.last_error = outcome.to_error(unit_id).map(|e| e.to_string());
                    run.decisions.append(
                        scope,
                        DecisionChoice::RegenerateFromUpstream,
                        format!(
                            "retries exhausted ({}); regenerating from '{source}'",
                            outcome.diagnostic_or_default()
                        ),
                        UnitStatus::Running,
                    );
                    regenerate_from = Some(source);
                    self.checkpoint(run).await?;
                }
                RetryDecision::SucceededWithDefault { value, description } => {
                    unit.status = UnitStatus::Completed;
                    unit.default_value = Some(value);
                    unit.last_error = outcome.to_error(unit_id).map(|e| e.to_string());
                    run.decisions.append(
                        scope,
                        DecisionChoice::SucceededWithDefault,
                        format!(
                            "escalated after {attempt} attempts ({}); using {description}",
                            outcome.diagnostic_or_default()
                        ),
                        UnitStatus::Completed,
                    );
                    break;
                }
                RetryDecision::Skip(reason) => {
                    unit.status = UnitStatus::Skipped;
                    unit.last_error = outcome.to_error(unit_id).map(|e| e.to_string());
                    run.decisions
                        .append(scope, DecisionChoice::Skipped, reason, UnitStatus::Skipped);
                    break;
                }
                RetryDecision::Fatal { absorbed } => {
                    unit.status = UnitStatus::Failed;
                    unit.last_error = outcome.to_error(unit_id).map(|e| e.to_string());
                    let consequence = if absorbed {
                        "unit is skippable, phase continues"
                    } else {
                        "required unit, phase will fail"
                    };
                    run.decisions.append(
                        scope,
                        DecisionChoice::Failed,
                        format!("fatal: {}; {consequence}", outcome.diagnostic_or_default()),
                        UnitStatus::Failed,
                    );
                    break;
                }
            }
        }

        run.phases[phase_index].units[idx].completed_at = Some(now_utc());
        self.unit_finished(run, phase_index, idx).await
    }

    /// Records artifacts and discovered units from a successful outcome.
    fn absorb_outputs(&self, run: &mut Run, phase_index: usize, unit_id: &str, outcome: &Outcome) {
        let phase = &mut run.phases[phase_index];
        for artifact in &outcome.artifacts {
            phase.add_artifact(artifact);
        }
        if outcome.discovered_units.is_empty() {
            return;
        }
        if !phase.generative {
            warn!(
                phase = %phase.name,
                unit = %unit_id,
                count = outcome.discovered_units.len(),
                "Ignoring units discovered in a non-generative phase"
            );
            return;
        }
        let added: Vec<String> = outcome
            .discovered_units
            .iter()
            .filter(|spec| phase.add_unit(spec))
            .map(|spec| spec.id.clone())
            .collect();
        if !added.is_empty() {
            let scope = DecisionScope::Phase(phase.name.clone());
            run.decisions.append(
                scope,
                DecisionChoice::UnitsDiscovered,
                format!("unit '{unit_id}' discovered {}: {}", added.len(), added.join(", ")),
                PhaseStatus::Running,
            );
        }
    }

    fn build_request(
        &self,
        run_id: &str,
        phase_name: &str,
        unit: &Unit,
        regenerate_from: Option<&str>,
    ) -> TaskRequest {
        let mut request = TaskRequest::new(&unit.kind, &unit.id);
        request.context = self.context.clone();
        request = request
            .with_context(CONTEXT_RUN_ID, json!(run_id))
            .with_context(CONTEXT_PHASE, json!(phase_name))
            .with_context(CONTEXT_ATTEMPT, json!(unit.attempt_count))
            .with_context(CONTEXT_DEPENDENCIES, json!(unit.dependencies));
        if let Some(source) = regenerate_from {
            request = request.with_context(CONTEXT_REGENERATE_FROM, json!(source));
        }
        request
    }

    async fn unit_finished(
        &self,
        run: &mut Run,
        phase_index: usize,
        idx: usize,
    ) -> Result<(), PhaseflowError> {
        run.refresh_completion();
        self.checkpoint(run).await?;
        let unit = &run.phases[phase_index].units[idx];
        info!(
            run_id = %run.run_id,
            unit = %unit.id,
            status = %unit.status,
            attempts = unit.attempt_count,
            completion = run.completion_percentage,
            "Unit finished"
        );
        self.events.publish(&WorkflowEvent::UnitFinished {
            run_id: run.run_id.clone(),
            phase: run.phases[phase_index].name.clone(),
            unit: unit.id.clone(),
            status: unit.status,
            attempts: unit.attempt_count,
            completion: run.completion_percentage,
        });
        Ok(())
    }

    async fn finish_phase(
        &self,
        run: &mut Run,
        phase_index: usize,
        status: PhaseStatus,
        rationale: impl Into<String>,
    ) -> Result<PhaseStatus, PhaseflowError> {
        let choice = match status {
            PhaseStatus::Completed => DecisionChoice::PhaseCompleted,
            PhaseStatus::Failed => DecisionChoice::PhaseFailed,
            PhaseStatus::Skipped => DecisionChoice::PhaseSkipped,
            other => {
                return Err(PhaseflowError::Internal(format!(
                    "phase cannot finish as {other}"
                )))
            }
        };
        let phase = &mut run.phases[phase_index];
        phase.status = status;
        phase.completed_at = Some(now_utc());
        let name = phase.name.clone();
        run.decisions
            .append(DecisionScope::Phase(name.clone()), choice, rationale, status);
        run.refresh_completion();
        self.checkpoint(run).await?;
        info!(run_id = %run.run_id, phase = %name, status = %status, "Phase finished");
        self.events.publish(&WorkflowEvent::PhaseFinished {
            run_id: run.run_id.clone(),
            phase: name,
            status,
        });
        Ok(status)
    }

    /// Pointer to `unit_id`, positioned in the phase's execution order.
    fn resume_pointer(&self, run: &Run, phase_index: usize, unit_id: &str) -> ResumePointer {
        let order = self.resolver.resolve_units(&run.phases[phase_index].units).order;
        ResumePointer {
            phase_index,
            unit_index: order.iter().position(|id| id == unit_id).unwrap_or(order.len()),
            unit_id: Some(unit_id.to_string()),
            reason: self.pause_reason(),
        }
    }

    /// Pointer to the first unit of the phase that has not finished.
    fn next_pointer(&self, run: &Run, phase_index: usize) -> ResumePointer {
        let phase = &run.phases[phase_index];
        let order = self.resolver.resolve_units(&phase.units).order;
        let unit_index = order
            .iter()
            .position(|id| phase.unit(id).is_some_and(|u| !u.is_terminal()))
            .unwrap_or(order.len());
        ResumePointer {
            phase_index,
            unit_index,
            unit_id: order.get(unit_index).cloned(),
            reason: self.pause_reason(),
        }
    }

    fn pause_reason(&self) -> String {
        self.pause
            .reason()
            .unwrap_or_else(|| "pause requested".to_string())
    }

    async fn checkpoint(&self, run: &mut Run) -> Result<(), PhaseflowError> {
        run.touch();
        self.store.save(run).await
    }
}

fn completion_rationale(units: &[Unit]) -> String {
    let skipped = units.iter().filter(|u| u.status == UnitStatus::Skipped).count();
    let failed = units.iter().filter(|u| u.status == UnitStatus::Failed).count();
    let defaulted = units.iter().filter(|u| u.default_value.is_some()).count();
    if skipped + failed + defaulted == 0 {
        return format!("all {} units completed", units.len());
    }
    format!(
        "all {} units terminal; concerns: {failed} failed, {skipped} skipped, {defaulted} defaulted",
        units.len()
    )
}
