//! Run lifecycle: start, pause, resume, and phase sequencing.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::phase_runner::{PhaseRunResult, PhaseRunner};
use super::resolver::DependencyResolver;
use super::retry::RetryPolicy;
use super::summary::RunSummary;
use crate::config::WorkflowConfig;
use crate::control::PauseToken;
use crate::core::{
    DecisionChoice, DecisionScope, PhaseStatus, ResumePointer, Run, RunStatus, UnitStatus,
};
use crate::errors::PhaseflowError;
use crate::events::{EventSink, NoOpEventSink, WorkflowEvent};
use crate::executor::TaskExecutor;
use crate::store::{FileProgressStore, ProgressStore};

/// Owns a workflow's run from start to a terminal or paused state.
///
/// Phases execute strictly in order. A failed blocking phase halts the run;
/// any other phase outcome lets the run proceed.
pub struct WorkflowCoordinator {
    config: WorkflowConfig,
    runner: PhaseRunner,
    store: Arc<dyn ProgressStore>,
    pause: Arc<PauseToken>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("workflow_kind", &self.config.workflow_kind)
            .field("phases", &self.config.phases.len())
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl WorkflowCoordinator {
    /// Creates a coordinator over the given executor and store.
    pub fn new(
        config: WorkflowConfig,
        executor: Arc<dyn TaskExecutor>,
        store: Arc<dyn ProgressStore>,
    ) -> Result<Self, PhaseflowError> {
        config.validate()?;
        let pause = Arc::new(PauseToken::new());
        let policy = Arc::new(RetryPolicy::new(
            config.retry.clone(),
            config.escalation.clone(),
        ));
        let runner = PhaseRunner::new(executor, store.clone(), policy)
            .with_pause_token(pause.clone())
            .with_context(config.context.clone());
        Ok(Self {
            config,
            runner,
            store,
            pause,
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Creates a coordinator persisting to `config.state_path`.
    pub fn with_file_store(
        config: WorkflowConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, PhaseflowError> {
        let store = Arc::new(FileProgressStore::new(config.state_path.clone()));
        Self::new(config, executor, store)
    }

    /// Sets the event sink for run, phase, and unit events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.runner = self.runner.with_event_sink(events.clone());
        self.events = events;
        self
    }

    /// Shares an externally owned pause token, e.g. one set by a signal handler.
    #[must_use]
    pub fn with_pause_token(mut self, pause: Arc<PauseToken>) -> Self {
        self.runner = self.runner.with_pause_token(pause.clone());
        self.pause = pause;
        self
    }

    /// Returns the token that requests a pause at the next unit boundary.
    #[must_use]
    pub fn pause_token(&self) -> Arc<PauseToken> {
        self.pause.clone()
    }

    /// Requests a pause at the next unit boundary.
    pub fn pause(&self, reason: impl Into<String>) {
        self.pause.request(reason);
    }

    /// Starts a new run and drives it until it completes, fails, or pauses.
    ///
    /// Refuses to overwrite a paused or interrupted run.
    pub async fn start(&self) -> Result<RunSummary, PhaseflowError> {
        if let Some(existing) = self.store.load().await? {
            if existing.status.is_resumable() {
                return Err(PhaseflowError::ActiveRunExists(existing.run_id));
            }
            warn!(run_id = %existing.run_id, status = %existing.status, "Archiving leftover terminal run");
            self.store.archive(&existing).await?;
        }

        let mut run = Run::new(&self.config.workflow_kind, &self.config.phases);
        info!(
            run_id = %run.run_id,
            kind = %run.workflow_kind,
            phases = run.phases.len(),
            units = run.total_units(),
            "Run started"
        );
        self.events.publish(&WorkflowEvent::RunStarted {
            run_id: run.run_id.clone(),
            workflow_kind: run.workflow_kind.clone(),
        });
        self.store.save(&run).await?;
        self.drive(&mut run).await
    }

    /// Resumes the paused or interrupted run in the progress store.
    ///
    /// Units already terminal are never re-executed. Non-terminal units
    /// before the resume point, and any unit caught mid-execution, are
    /// re-queued.
    pub async fn resume(&self) -> Result<RunSummary, PhaseflowError> {
        let mut resumable = false;
        let loaded = self
            .store
            .update(&mut |run: &mut Run| {
                if run.status.is_resumable() {
                    prepare_resume(run);
                    resumable = true;
                }
            })
            .await?;
        let Some(mut run) = loaded else {
            return Err(PhaseflowError::NoResumableRun(
                "the progress store holds no run".into(),
            ));
        };
        if !resumable {
            return Err(PhaseflowError::NoResumableRun(format!(
                "run '{}' is {}",
                run.run_id, run.status
            )));
        }

        self.pause.clear();
        info!(
            run_id = %run.run_id,
            phase_index = run.current_phase_index,
            completion = run.completion_percentage,
            "Run resumed"
        );
        self.events.publish(&WorkflowEvent::RunResumed {
            run_id: run.run_id.clone(),
        });
        self.drive(&mut run).await
    }

    async fn drive(&self, run: &mut Run) -> Result<RunSummary, PhaseflowError> {
        while run.current_phase_index < run.phases.len() {
            let idx = run.current_phase_index;
            match self.runner.run_phase(run, idx).await? {
                PhaseRunResult::Paused(pointer) => return self.pause_run(run, pointer).await,
                PhaseRunResult::Finished(PhaseStatus::Failed) if run.phases[idx].blocking => {
                    let rationale = format!("blocking phase '{}' failed", run.phases[idx].name);
                    return self.finish_run(run, RunStatus::Failed, rationale).await;
                }
                PhaseRunResult::Finished(_) => {
                    run.current_phase_index += 1;
                    self.checkpoint(run).await?;
                }
            }
        }

        let concerns = run
            .decisions
            .entries()
            .iter()
            .filter(|d| d.choice.is_concern())
            .count();
        let rationale = if concerns == 0 {
            "all phases finished".to_string()
        } else {
            format!("all phases finished with {concerns} unresolved issues")
        };
        self.finish_run(run, RunStatus::Completed, rationale).await
    }

    async fn pause_run(
        &self,
        run: &mut Run,
        pointer: ResumePointer,
    ) -> Result<RunSummary, PhaseflowError> {
        let phase_name = run
            .phases
            .get(pointer.phase_index)
            .map_or("", |p| p.name.as_str())
            .to_string();
        let rationale = format!(
            "paused before unit '{}' in phase '{phase_name}': {}",
            pointer.unit_id.as_deref().unwrap_or("-"),
            pointer.reason
        );
        let reason = pointer.reason.clone();
        run.status = RunStatus::Paused;
        run.resume_from = Some(pointer);
        run.decisions.append(
            DecisionScope::Run(run.run_id.clone()),
            DecisionChoice::RunPaused,
            rationale,
            RunStatus::Paused,
        );
        run.refresh_completion();
        self.checkpoint(run).await?;
        info!(run_id = %run.run_id, completion = run.completion_percentage, "Run paused");
        self.events.publish(&WorkflowEvent::RunPaused {
            run_id: run.run_id.clone(),
            reason,
        });
        Ok(RunSummary::from_run(run))
    }

    async fn finish_run(
        &self,
        run: &mut Run,
        status: RunStatus,
        rationale: String,
    ) -> Result<RunSummary, PhaseflowError> {
        let choice = if status == RunStatus::Completed {
            DecisionChoice::RunCompleted
        } else {
            DecisionChoice::RunFailed
        };
        run.status = status;
        run.decisions.append(
            DecisionScope::Run(run.run_id.clone()),
            choice,
            rationale,
            status,
        );
        run.refresh_completion();
        self.checkpoint(run).await?;
        self.store.archive(run).await?;

        let summary = RunSummary::from_run(run);
        info!(
            run_id = %run.run_id,
            status = %status,
            completion = run.completion_percentage,
            unresolved = summary.unresolved_issues.len(),
            "Run finished"
        );
        self.events.publish(&WorkflowEvent::RunFinished {
            run_id: run.run_id.clone(),
            status,
        });
        Ok(summary)
    }

    async fn checkpoint(&self, run: &mut Run) -> Result<(), PhaseflowError> {
        run.touch();
        self.store.save(run).await
    }
}

/// Re-queues unfinished work and positions the run for resumption.
///
/// "Before the pointer" means earlier in the phase's execution order, the
/// same order the runner used when it paused.
fn prepare_resume(run: &mut Run) {
    let pointer = run.resume_from.take();
    let (stop_phase, stop_unit) = pointer
        .as_ref()
        .map_or((run.current_phase_index, 0), |p| (p.phase_index, p.unit_index));

    let resolver = DependencyResolver::new();
    let mut requeued = Vec::new();
    for (pi, phase) in run.phases.iter_mut().enumerate() {
        let ahead: HashSet<String> = match pi.cmp(&stop_phase) {
            Ordering::Less => phase.units.iter().map(|u| u.id.clone()).collect(),
            Ordering::Equal => resolver
                .resolve_units(&phase.units)
                .order
                .into_iter()
                .take(stop_unit)
                .collect(),
            Ordering::Greater => HashSet::new(),
        };
        for unit in &mut phase.units {
            if unit.status == UnitStatus::Running || (ahead.contains(&unit.id) && !unit.is_terminal()) {
                unit.requeue();
                requeued.push(unit.id.clone());
            }
        }
    }
    for id in requeued {
        run.decisions.append(
            DecisionScope::Unit(id),
            DecisionChoice::Requeued,
            "not terminal at resume; re-queued",
            UnitStatus::Pending,
        );
    }

    let first_open = run
        .phases
        .iter()
        .position(|p| !p.status.is_terminal() || !p.all_units_terminal())
        .unwrap_or(run.phases.len());
    if let Some(phase) = run.phases.get_mut(first_open) {
        if phase.status.is_terminal() {
            phase.status = PhaseStatus::Running;
            phase.completed_at = None;
        }
    }
    run.current_phase_index = run.current_phase_index.min(first_open);

    let rationale = match &pointer {
        Some(p) => format!(
            "resuming at phase {} unit {} after pause: {}",
            p.phase_index, p.unit_index, p.reason
        ),
        None => format!(
            "resuming interrupted run at phase {}",
            run.current_phase_index
        ),
    };
    run.status = RunStatus::InProgress;
    run.decisions.append(
        DecisionScope::Run(run.run_id.clone()),
        DecisionChoice::RunResumed,
        rationale,
        RunStatus::InProgress,
    );
}
