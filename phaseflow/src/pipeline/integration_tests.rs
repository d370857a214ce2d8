//! End-to-end tests for workflow runs.

#[cfg(test)]
mod tests {
    use crate::config::WorkflowConfig;
    use crate::control::PauseToken;
    use crate::core::{
        DecisionChoice, DecisionScope, Outcome, PhaseDefinition, PhaseStatus, Remedy, Run,
        RunStatus, UnitSpec, UnitStatus,
    };
    use crate::errors::PhaseflowError;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{EscalationConfig, RetryConfig, RunSummary, WorkflowCoordinator};
    use crate::store::{FileProgressStore, InMemoryProgressStore, ProgressStore};
    use crate::testing::{
        assert_decision_count, assert_phase_status, assert_run_status, assert_unit_attempts,
        assert_unit_status, ScriptedExecutor,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn single_phase(ids: &[&str]) -> WorkflowConfig {
        let mut phase = PhaseDefinition::new("build");
        for id in ids {
            phase = phase.with_unit(UnitSpec::new(*id));
        }
        WorkflowConfig::new("test-workflow").with_phase(phase)
    }

    fn coordinator(
        config: WorkflowConfig,
        exec: &Arc<ScriptedExecutor>,
        store: &Arc<InMemoryProgressStore>,
    ) -> WorkflowCoordinator {
        WorkflowCoordinator::new(config, exec.clone(), store.clone()).expect("valid config")
    }

    fn unit_decisions(summary: &RunSummary, unit: &str) -> Vec<DecisionChoice> {
        summary
            .decisions
            .iter()
            .filter(|d| matches!(&d.scope, DecisionScope::Unit(id) if id == unit))
            .map(|d| d.choice)
            .collect()
    }

    #[tokio::test]
    async fn test_all_units_succeed_first_time() {
        let exec = Arc::new(ScriptedExecutor::new());
        let store = Arc::new(InMemoryProgressStore::new());

        let summary = coordinator(single_phase(&["a", "b", "c"]), &exec, &store)
            .start()
            .await
            .unwrap();

        assert_run_status(&summary, RunStatus::Completed);
        assert_phase_status(&summary, "build", PhaseStatus::Completed);
        assert!((summary.completion_percentage - 100.0).abs() < f64::EPSILON);
        assert_decision_count(&summary, DecisionChoice::Succeeded, 3);
        assert!(summary.unresolved_issues.is_empty());
        assert_eq!(exec.invoked_units(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_dependency_runs_before_dependent() {
        let exec = Arc::new(ScriptedExecutor::new());
        let store = Arc::new(InMemoryProgressStore::new());
        let config = WorkflowConfig::new("wf").with_phase(
            PhaseDefinition::new("build")
                .with_unit(UnitSpec::new("x").with_dependency("y"))
                .with_unit(UnitSpec::new("y")),
        );

        coordinator(config, &exec, &store).start().await.unwrap();

        assert_eq!(exec.invoked_units(), vec!["y", "x"]);
    }

    #[tokio::test]
    async fn test_recoverable_failures_then_success() {
        let exec = Arc::new(ScriptedExecutor::new().with_script(
            "z",
            [
                Outcome::recoverable("timeout"),
                Outcome::recoverable("timeout"),
                Outcome::success(),
            ],
        ));
        let store = Arc::new(InMemoryProgressStore::new());

        let summary = coordinator(single_phase(&["z"]), &exec, &store)
            .start()
            .await
            .unwrap();

        assert_unit_status(&summary, "z", UnitStatus::Completed);
        assert_unit_attempts(&summary, "z", 3);
        assert_eq!(
            unit_decisions(&summary, "z"),
            vec![
                DecisionChoice::Retry,
                DecisionChoice::Retry,
                DecisionChoice::Succeeded
            ]
        );
        let attempts: Vec<_> = exec.invocations().iter().filter_map(|r| r.attempt()).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fatal_skippable_unit_is_absorbed_and_reported() {
        let exec = Arc::new(
            ScriptedExecutor::new().with_script("w", [Outcome::fatal("missing artifact")]),
        );
        let store = Arc::new(InMemoryProgressStore::new());

        let summary = coordinator(single_phase(&["v", "w"]), &exec, &store)
            .start()
            .await
            .unwrap();

        assert_unit_status(&summary, "w", UnitStatus::Failed);
        assert_phase_status(&summary, "build", PhaseStatus::Completed);
        assert_run_status(&summary, RunStatus::Completed);
        assert!(summary.has_issue_for_unit("w"));
        assert_unit_attempts(&summary, "w", 1);
    }

    #[tokio::test]
    async fn test_pause_mid_phase_and_resume_remaining_units() {
        let pause = Arc::new(PauseToken::new());
        let exec = Arc::new(ScriptedExecutor::new().pause_after("u2", pause.clone()));
        let store = Arc::new(InMemoryProgressStore::new());
        let config = single_phase(&["u1", "u2", "u3", "u4", "u5"]);

        let paused = coordinator(config.clone(), &exec, &store)
            .with_pause_token(pause.clone())
            .start()
            .await
            .unwrap();

        assert_run_status(&paused, RunStatus::Paused);
        let pointer = paused.resume_from.clone().expect("resume pointer");
        assert_eq!(pointer.phase_index, 0);
        assert_eq!(pointer.unit_index, 2);
        assert_eq!(pointer.unit_id.as_deref(), Some("u3"));
        assert_eq!(exec.invoked_units(), vec!["u1", "u2"]);

        let stored = store.load().await.unwrap().expect("paused run persisted");
        assert_eq!(stored.status, RunStatus::Paused);

        exec.reset();
        let resumed = coordinator(config, &exec, &store)
            .with_pause_token(pause.clone())
            .resume()
            .await
            .unwrap();

        assert_eq!(exec.invoked_units(), vec!["u3", "u4", "u5"]);
        assert_run_status(&resumed, RunStatus::Completed);
        assert_eq!(resumed.run_id, paused.run_id);
        assert_decision_count(&resumed, DecisionChoice::RunPaused, 1);
        assert_decision_count(&resumed, DecisionChoice::RunResumed, 1);
        assert_decision_count(&resumed, DecisionChoice::Requeued, 0);
        assert!(!pause.is_requested());
    }

    #[tokio::test]
    async fn test_pause_at_phase_end_does_not_enter_next_phase() {
        let pause = Arc::new(PauseToken::new());
        let exec = Arc::new(
            ScriptedExecutor::new()
                .with_discovery("stories", vec![UnitSpec::new("s1")])
                .pause_after("u1", pause.clone()),
        );
        let store = Arc::new(InMemoryProgressStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let config = WorkflowConfig::new("wf")
            .with_phase(PhaseDefinition::new("plan").with_unit(UnitSpec::new("u1")))
            .with_phase(PhaseDefinition::new("stories").generative());

        let paused = coordinator(config.clone(), &exec, &store)
            .with_pause_token(pause.clone())
            .with_event_sink(events.clone())
            .start()
            .await
            .unwrap();

        assert_run_status(&paused, RunStatus::Paused);
        assert_phase_status(&paused, "plan", PhaseStatus::Completed);
        assert_phase_status(&paused, "stories", PhaseStatus::Pending);
        assert!(exec.enumerated_phases().is_empty());
        assert_eq!(events.named("phase.started").len(), 1);
        let pointer = paused.resume_from.clone().expect("resume pointer");
        assert_eq!((pointer.phase_index, pointer.unit_index), (1, 0));

        let resumed = coordinator(config, &exec, &store)
            .with_pause_token(pause)
            .resume()
            .await
            .unwrap();

        assert_run_status(&resumed, RunStatus::Completed);
        assert_eq!(exec.enumerated_phases(), vec!["stories"]);
        assert_eq!(exec.invoked_units(), vec!["u1", "s1"]);
    }

    #[tokio::test]
    async fn test_resume_when_declaration_order_differs_from_execution_order() {
        let config = WorkflowConfig::new("wf").with_phase(
            PhaseDefinition::new("build")
                .with_unit(UnitSpec::new("a").with_dependency("c"))
                .with_unit(UnitSpec::new("b"))
                .with_unit(UnitSpec::new("c")),
        );
        let straight_exec = Arc::new(ScriptedExecutor::new());
        let straight = coordinator(config.clone(), &straight_exec, &Arc::new(InMemoryProgressStore::new()))
            .start()
            .await
            .unwrap();

        let pause = Arc::new(PauseToken::new());
        let exec = Arc::new(ScriptedExecutor::new().pause_after("b", pause.clone()));
        let store = Arc::new(InMemoryProgressStore::new());
        let paused = coordinator(config.clone(), &exec, &store)
            .with_pause_token(pause.clone())
            .start()
            .await
            .unwrap();
        let pointer = paused.resume_from.clone().expect("resume pointer");
        assert_eq!(pointer.unit_id.as_deref(), Some("c"));
        assert_eq!(pointer.unit_index, 1);

        let resumed = coordinator(config, &exec, &store)
            .with_pause_token(pause)
            .resume()
            .await
            .unwrap();

        assert_eq!(exec.invoked_units(), vec!["b", "c", "a"]);
        assert_decision_count(&resumed, DecisionChoice::Requeued, 0);
        let unit_choices = |summary: &RunSummary| -> Vec<(DecisionScope, DecisionChoice)> {
            summary
                .decisions
                .iter()
                .filter(|d| matches!(d.scope, DecisionScope::Unit(_)))
                .map(|d| (d.scope.clone(), d.choice))
                .collect()
        };
        assert_eq!(unit_choices(&resumed), unit_choices(&straight));
        assert_eq!(resumed.units, straight.units);
    }

    #[tokio::test]
    async fn test_pause_and_resume_matches_uninterrupted_run() {
        let config = WorkflowConfig::new("wf")
            .with_phase(
                PhaseDefinition::new("design")
                    .with_unit(UnitSpec::new("d1"))
                    .with_unit(UnitSpec::new("d2").with_dependency("d1")),
            )
            .with_phase(
                PhaseDefinition::new("build")
                    .with_unit(UnitSpec::new("b1"))
                    .with_unit(UnitSpec::new("b2").with_dependency("b1")),
            );
        let script = || {
            ScriptedExecutor::new().with_script("b1", [Outcome::recoverable("flaky"), Outcome::success()])
        };

        let straight_exec = Arc::new(script());
        let straight = coordinator(config.clone(), &straight_exec, &Arc::new(InMemoryProgressStore::new()))
            .start()
            .await
            .unwrap();

        let pause = Arc::new(PauseToken::new());
        let exec = Arc::new(script().pause_after("d2", pause.clone()));
        let store = Arc::new(InMemoryProgressStore::new());
        let first = coordinator(config.clone(), &exec, &store)
            .with_pause_token(pause.clone())
            .start()
            .await
            .unwrap();
        assert_run_status(&first, RunStatus::Paused);
        let pointer = first.resume_from.clone().expect("resume pointer");
        assert_eq!((pointer.phase_index, pointer.unit_index), (1, 0));

        let resumed = coordinator(config, &exec, &store)
            .with_pause_token(pause)
            .resume()
            .await
            .unwrap();

        assert_eq!(resumed.status, straight.status);
        assert_eq!(resumed.phases, straight.phases);
        assert_eq!(resumed.units, straight.units);
        assert!((resumed.completion_percentage - straight.completion_percentage).abs() < f64::EPSILON);
        assert_eq!(exec.invoked_units(), straight_exec.invoked_units());
    }

    #[tokio::test]
    async fn test_retry_bound_with_upstream_regeneration() {
        let exec = Arc::new(ScriptedExecutor::new().with_fallback(
            Outcome::recoverable("output contradicts story").with_remedy(Remedy::DeferToUpstream {
                source: "stories/s1.md".into(),
            }),
        ));
        let store = Arc::new(InMemoryProgressStore::new());
        let config = single_phase(&["s1"]).with_retry(RetryConfig::new().with_max_attempts(3));

        let summary = coordinator(config, &exec, &store).start().await.unwrap();

        assert_eq!(exec.call_count("s1"), 4);
        assert_unit_status(&summary, "s1", UnitStatus::Skipped);
        assert_eq!(
            unit_decisions(&summary, "s1"),
            vec![
                DecisionChoice::Retry,
                DecisionChoice::Retry,
                DecisionChoice::RegenerateFromUpstream,
                DecisionChoice::Skipped
            ]
        );
        let last = exec.invocations().pop().expect("invocations");
        assert_eq!(last.regenerate_from(), Some("stories/s1.md"));
        assert!(summary.has_issue_for_unit("s1"));
        assert_phase_status(&summary, "build", PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_configured_default_resolves_exhausted_unit() {
        let exec = Arc::new(ScriptedExecutor::new().with_fallback(Outcome::recoverable("no lint config")));
        let store = Arc::new(InMemoryProgressStore::new());
        let config = WorkflowConfig::new("wf")
            .with_phase(
                PhaseDefinition::new("quality").with_unit(UnitSpec::new("lint").with_kind("lint")),
            )
            .with_retry(RetryConfig::new().with_max_attempts(2))
            .with_escalation(
                EscalationConfig::default()
                    .with_default("lint", serde_json::json!({ "rules": "recommended" })),
            );

        let summary = coordinator(config, &exec, &store).start().await.unwrap();

        assert_unit_status(&summary, "lint", UnitStatus::Completed);
        assert_eq!(exec.call_count("lint"), 2);
        assert_decision_count(&summary, DecisionChoice::SucceededWithDefault, 1);
        assert!(summary.has_issue_for_unit("lint"));
    }

    #[tokio::test]
    async fn test_blocking_phase_failure_halts_run() {
        let exec = Arc::new(ScriptedExecutor::new().with_script("arch", [Outcome::fatal("no requirements")]));
        let store = Arc::new(InMemoryProgressStore::new());
        let config = WorkflowConfig::new("greenfield")
            .with_phase(
                PhaseDefinition::new("architecture")
                    .blocking()
                    .with_unit(UnitSpec::new("arch").required()),
            )
            .with_phase(PhaseDefinition::new("stories").with_unit(UnitSpec::new("s1")));

        let summary = coordinator(config, &exec, &store).start().await.unwrap();

        assert_run_status(&summary, RunStatus::Failed);
        assert_phase_status(&summary, "architecture", PhaseStatus::Failed);
        assert_phase_status(&summary, "stories", PhaseStatus::Pending);
        assert_eq!(exec.call_count("s1"), 0);
        assert_decision_count(&summary, DecisionChoice::RunFailed, 1);

        // Terminal runs are archived and cannot be resumed.
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.archived().await.len(), 1);
        let exec = Arc::new(ScriptedExecutor::new());
        let err = coordinator(single_phase(&["a"]), &exec, &store)
            .resume()
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseflowError::NoResumableRun(_)));
    }

    #[tokio::test]
    async fn test_non_blocking_phase_failure_continues() {
        let exec = Arc::new(ScriptedExecutor::new().with_script("schema", [Outcome::fatal("invalid")]));
        let store = Arc::new(InMemoryProgressStore::new());
        let config = WorkflowConfig::new("wf")
            .with_phase(PhaseDefinition::new("db").with_unit(UnitSpec::new("schema").required()))
            .with_phase(PhaseDefinition::new("docs").with_unit(UnitSpec::new("readme")));

        let summary = coordinator(config, &exec, &store).start().await.unwrap();

        assert_phase_status(&summary, "db", PhaseStatus::Failed);
        assert_phase_status(&summary, "docs", PhaseStatus::Completed);
        assert_run_status(&summary, RunStatus::Completed);
        assert_decision_count(&summary, DecisionChoice::PhaseFailed, 1);
    }

    #[tokio::test]
    async fn test_generative_phase_and_monotonic_completion() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .with_discovery("stories", vec![UnitSpec::new("s1"), UnitSpec::new("s2")])
                .with_script(
                    "s1",
                    [Outcome::success()
                        .with_discovered_unit(UnitSpec::new("s1a").with_dependency("s1"))
                        .with_discovered_unit(UnitSpec::new("s1b"))],
                ),
        );
        let store = Arc::new(InMemoryProgressStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let config = WorkflowConfig::new("wf")
            .with_phase(PhaseDefinition::new("plan").with_unit(UnitSpec::new("p")))
            .with_phase(PhaseDefinition::new("stories").generative())
            .with_phase(PhaseDefinition::new("extras").optional());

        let summary = coordinator(config, &exec, &store)
            .with_event_sink(events.clone())
            .start()
            .await
            .unwrap();

        assert_eq!(exec.invoked_units(), vec!["p", "s1", "s2", "s1a", "s1b"]);
        assert_phase_status(&summary, "extras", PhaseStatus::Skipped);
        assert_decision_count(&summary, DecisionChoice::UnitsDiscovered, 2);

        let completions = events.completions();
        assert_eq!(completions.len(), 5);
        assert!(completions.windows(2).all(|w| w[0] <= w[1]), "{completions:?}");
        assert_eq!(events.named("run.").len(), 2);
        assert!(events
            .named("unit.")
            .iter()
            .all(|e| e.run_id() == summary.run_id && e.phase().is_some()));
    }

    #[tokio::test]
    async fn test_cycle_is_broken_and_recorded() {
        let exec = Arc::new(ScriptedExecutor::new());
        let store = Arc::new(InMemoryProgressStore::new());
        let config = WorkflowConfig::new("wf").with_phase(
            PhaseDefinition::new("build")
                .with_unit(UnitSpec::new("a").with_dependency("c"))
                .with_unit(UnitSpec::new("b").with_dependency("a"))
                .with_unit(UnitSpec::new("c").with_dependency("b")),
        );

        let summary = coordinator(config, &exec, &store).start().await.unwrap();

        assert_eq!(exec.invoked_units(), vec!["a", "b", "c"]);
        assert_run_status(&summary, RunStatus::Completed);
        assert_decision_count(&summary, DecisionChoice::CycleBroken, 1);
        assert!(summary
            .unresolved_issues
            .iter()
            .any(|i| i.choice == DecisionChoice::CycleBroken));
    }

    #[tokio::test]
    async fn test_start_refuses_to_clobber_paused_run() {
        let pause = Arc::new(PauseToken::new());
        let exec = Arc::new(ScriptedExecutor::new().pause_after("a", pause.clone()));
        let store = Arc::new(InMemoryProgressStore::new());
        let coord = coordinator(single_phase(&["a", "b"]), &exec, &store).with_pause_token(pause);

        coord.start().await.unwrap();
        let err = coord.start().await.unwrap_err();

        assert!(matches!(err, PhaseflowError::ActiveRunExists(_)));
    }

    #[tokio::test]
    async fn test_resume_after_crash_requeues_in_flight_unit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("current-run.json");
        let config = single_phase(&["u1", "u2", "u3"]).with_state_path(&path);

        // Simulate a crash while u2 was executing.
        let mut run = Run::new(&config.workflow_kind, &config.phases);
        run.phases[0].status = PhaseStatus::Running;
        run.phases[0].units[0].status = UnitStatus::Completed;
        run.phases[0].units[0].attempt_count = 1;
        run.phases[0].units[1].status = UnitStatus::Running;
        run.phases[0].units[1].attempt_count = 1;
        FileProgressStore::new(&path).save(&run).await.unwrap();

        let exec = Arc::new(ScriptedExecutor::new());
        let summary = WorkflowCoordinator::with_file_store(config, exec.clone())
            .unwrap()
            .resume()
            .await
            .unwrap();

        assert_eq!(exec.invoked_units(), vec!["u2", "u3"]);
        assert_run_status(&summary, RunStatus::Completed);
        assert_unit_attempts(&summary, "u1", 1);
        assert_unit_attempts(&summary, "u2", 2);
        assert_decision_count(&summary, DecisionChoice::Requeued, 1);
        assert!(!path.exists(), "completed run is archived");
        assert!(temp.path().join("runs").is_dir());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported_not_reset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("current-run.json");
        std::fs::write(&path, "{\"run_id\": 42").unwrap();
        let config = single_phase(&["a"]).with_state_path(&path);
        let exec = Arc::new(ScriptedExecutor::new());
        let coord = WorkflowCoordinator::with_file_store(config, exec.clone()).unwrap();

        let err = coord.resume().await.unwrap_err();
        assert!(matches!(err, PhaseflowError::ProgressStoreCorrupt(_)));
        let err = coord.start().await.unwrap_err();
        assert!(matches!(err, PhaseflowError::ProgressStoreCorrupt(_)));

        assert!(path.exists());
        assert!(exec.invoked_units().is_empty());
    }

    #[tokio::test]
    async fn test_decision_log_is_ordered_and_persisted() {
        let exec = Arc::new(ScriptedExecutor::new().with_script("b", [Outcome::recoverable("slow")]));
        let store = Arc::new(InMemoryProgressStore::new());

        let summary = coordinator(single_phase(&["a", "b"]), &exec, &store)
            .start()
            .await
            .unwrap();

        let sequences: Vec<u64> = summary.decisions.iter().map(|d| d.sequence).collect();
        let expected: Vec<u64> = (0..summary.decisions.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(summary
            .decisions
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));

        let archived = store.archived().await;
        assert_eq!(archived[0].decisions.len(), summary.decisions.len());
        assert!(archived[0].decisions.check_ordering().is_ok());
    }
}
