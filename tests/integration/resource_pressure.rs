//! Resource governor integration tests.
//!
//! These tests verify that a run degrades under budget pressure instead of
//! failing: non-essential phases are deferred at the critical level, work
//! that does not depend on them continues, and handlers are asked for less
//! output as the level rises.

use std::sync::Arc;
use std::time::Duration;

use maestro::config::OrchestrationConfig;
use maestro::core::{
    ConcurrencyMode, ExecutionStrategy, HandlerId, Phase, PhaseId, PhaseKind, PhaseStatus,
    WorkUnit,
};
use maestro::orchestration::{
    AccumulatedContext, Orchestrator, OrchestratorEvent, ResourceGovernor, ResourceLevel,
    Verbosity,
};
use maestro::{ExecutionPlan, ForcedStrategy, ResourceBudget, RunStatus, TaskFlags, TaskRequest};
use tokio::sync::mpsc;

use crate::fixtures::{Harness, Script, ScriptedHandler};

fn phase(id: usize, handler: &str, deps: &[usize]) -> Phase {
    Phase::new(PhaseId(id), PhaseKind::Execute, ConcurrencyMode::SequentialDependent)
        .with_units(vec![WorkUnit::new(HandlerId::new(handler), "task")])
        .depends_on(deps.iter().map(|d| PhaseId(*d)))
}

/// Test: Critical level between phase 2 and phase 3
/// Given a 4-phase plan whose second phase exhausts the budget
/// When the orchestrator runs it
/// Then the non-essential third phase is deferred and the fourth proceeds
#[tokio::test]
async fn test_critical_level_defers_non_essential_phase() {
    let handler = Arc::new(ScriptedHandler::new().on_handler(
        "heavy",
        Script::Usage {
            reply: "indexed everything".to_string(),
            units: 960,
        },
    ));
    let governor = Arc::new(ResourceGovernor::new(ResourceBudget::new(1_000)));
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::new(handler.clone(), governor.clone(), OrchestrationConfig::default())
        .with_events(tx);

    let plan = ExecutionPlan::new(
        ExecutionStrategy::Pipeline,
        vec![
            phase(0, "light", &[]),
            phase(1, "heavy", &[0]),
            phase(2, "light", &[1]).non_essential(),
            phase(3, "light", &[1]),
        ],
        None,
    )
    .unwrap();

    let outcome = orchestrator
        .run(&plan, AccumulatedContext::new("task", None))
        .await
        .unwrap();
    drop(orchestrator);

    assert!(outcome.phases[0].status.is_completed());
    assert!(outcome.phases[1].status.is_completed());
    assert!(matches!(outcome.phases[2].status, PhaseStatus::Deferred { .. }));
    assert!(outcome.phases[3].status.is_completed());
    assert_eq!(outcome.phases[3].level, ResourceLevel::Critical);
    assert!(governor.level().is_critical());

    let last = handler.calls().pop().unwrap();
    assert_eq!(last.phase, PhaseId(3));
    assert_eq!(last.verbosity, Verbosity::Minimal);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events.contains(&OrchestratorEvent::LevelChanged {
        level: ResourceLevel::Critical
    }));
    assert!(events.contains(&OrchestratorEvent::PhaseDeferred {
        phase: PhaseId(2),
        reason: "resource level critical".to_string()
    }));
}

/// Test: Escalation while a phase is running cancels it
#[tokio::test]
async fn test_escalation_mid_phase_defers_running_phase() {
    let handler = Arc::new(ScriptedHandler::new().on_handler("stuck", Script::WaitForCancel));
    let governor = Arc::new(ResourceGovernor::new(ResourceBudget::new(1_000)));
    let orchestrator = Orchestrator::new(handler.clone(), governor.clone(), OrchestrationConfig::default());

    let plan = ExecutionPlan::new(
        ExecutionStrategy::Pipeline,
        vec![
            Phase::new(PhaseId(0), PhaseKind::Analyze, ConcurrencyMode::ParallelIndependent)
                .with_units(vec![
                    WorkUnit::new(HandlerId::new("stuck"), "left"),
                    WorkUnit::new(HandlerId::new("stuck"), "right"),
                ]),
            phase(1, "light", &[0]),
        ],
        None,
    )
    .unwrap();

    let pressure = {
        let governor = governor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            governor.set_usage(990);
        })
    };

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&plan, AccumulatedContext::new("task", None)),
    )
    .await
    .expect("escalation should stop the stuck units")
    .unwrap();
    pressure.await.unwrap();

    assert!(matches!(outcome.phases[0].status, PhaseStatus::Deferred { .. }));
    assert!(matches!(outcome.phases[1].status, PhaseStatus::Deferred { .. }));
    assert_eq!(handler.calls().len(), 2);
}

/// Test: A run that exhausts its budget ends deferred, not crashed
#[tokio::test]
async fn test_engine_run_under_exhausted_budget_is_deferred() {
    let handler = ScriptedHandler::new().on_kind(
        PhaseKind::Execute,
        Script::Usage {
            reply: "settings endpoint added".to_string(),
            units: 10_000,
        },
    );
    let harness = Harness::new(handler);
    let request = TaskRequest::new("build the settings api endpoint")
        .with_flags(TaskFlags::default().with_strategy(ForcedStrategy::Pipeline))
        .with_budget(ResourceBudget::new(10_000));

    let report = harness
        .engine
        .run(request)
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.status, RunStatus::Deferred);
    let validate = report.phase(PhaseId(4)).unwrap();
    assert_eq!(validate.kind, PhaseKind::Validate);
    assert!(matches!(validate.status, PhaseStatus::Deferred { .. }));
    assert_eq!(report.output.as_deref(), Some("settings endpoint added"));
    assert_eq!(report.gates.results.len(), 8);
}

#[test]
fn test_level_throttles_parallelism_and_verbosity() {
    assert_eq!(ResourceLevel::from_fraction(0.60), ResourceLevel::Yellow);
    assert_eq!(ResourceLevel::from_fraction(0.95), ResourceLevel::Critical);
    assert_eq!(ResourceLevel::Green.parallelism(8), 8);
    assert_eq!(ResourceLevel::Orange.parallelism(8), 4);
    assert_eq!(ResourceLevel::Red.parallelism(8), 1);
    assert_eq!(ResourceLevel::Yellow.verbosity(), Verbosity::Reduced);
    assert_eq!(ResourceLevel::Critical.verbosity(), Verbosity::Minimal);
}
