//! Handler failure and retry integration tests.
//!
//! These tests verify that failures stay contained to the phases that
//! depend on them, that transient errors are retried, and that every phase
//! of the plan is always present in the report.

use maestro::core::{PhaseId, PhaseKind, PhaseStatus};
use maestro::{ForcedStrategy, RunStatus, TaskFlags, TaskRequest};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{Harness, Script, ScriptedHandler};

fn pipeline_request() -> TaskRequest {
    TaskRequest::new("build the settings api endpoint")
        .with_flags(TaskFlags::default().with_strategy(ForcedStrategy::Pipeline))
}

/// Test: A failing phase blocks its dependents
/// Given a pipeline whose plan phase throws
/// When the engine runs it
/// Then the run fails and execute/validate are reported as not attempted
#[tokio::test]
async fn test_failed_phase_marks_dependents_not_attempted() {
    let handler = ScriptedHandler::new().on_kind(
        PhaseKind::Plan,
        Script::Fatal("planner crashed".to_string()),
    );
    let harness = Harness::new(handler);

    let report = harness
        .engine
        .run(pipeline_request())
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.phases.len(), report.plan.len());

    let plan = report.phase(PhaseId(2)).unwrap();
    assert_eq!(plan.kind, PhaseKind::Plan);
    assert_eq!(
        plan.status,
        PhaseStatus::Failed {
            error: "fatal failure: planner crashed".to_string()
        }
    );
    assert_eq!(
        report.phase(PhaseId(3)).unwrap().status,
        PhaseStatus::NotAttempted { blocked_by: PhaseId(2) }
    );
    assert_eq!(
        report.phase(PhaseId(4)).unwrap().status,
        PhaseStatus::NotAttempted { blocked_by: PhaseId(3) }
    );
    assert!(report.phase(PhaseId(0)).unwrap().status.is_completed());
    assert!(report.phase(PhaseId(1)).unwrap().status.is_completed());

    assert!(report.failure.as_deref().unwrap().contains("planner crashed"));
    assert!(harness.handler.calls_for(PhaseKind::Execute).is_empty());
    assert_eq!(report.gates.results.len(), 8);
}

/// Test: Transient failures are retried
#[tokio::test]
async fn test_transient_failure_recovers() {
    let mut config = maestro::Config::default();
    config.orchestration.retry_backoff_ms = 1;
    let handler = ScriptedHandler::new().on_kind(
        PhaseKind::Execute,
        Script::Transient {
            failures: 2,
            reply: "settings endpoint added".to_string(),
        },
    );
    let harness = Harness::with_config(config, handler);

    let report = harness
        .engine
        .run(pipeline_request())
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let execute = report.phase(PhaseId(3)).unwrap();
    assert_eq!(execute.retries, 2);
    assert_eq!(report.output.as_deref(), Some("settings endpoint added"));
    assert_eq!(harness.handler.calls_for(PhaseKind::Execute).len(), 3);
}

/// Test: Retries are bounded
#[tokio::test]
async fn test_exhausted_retries_fail_phase() {
    let mut config = maestro::Config::default();
    config.orchestration.retry_backoff_ms = 1;
    config.orchestration.max_retries = 1;
    let handler = ScriptedHandler::new().on_kind(
        PhaseKind::Execute,
        Script::Transient {
            failures: 5,
            reply: "never".to_string(),
        },
    );
    let harness = Harness::with_config(config, handler);

    let report = harness
        .engine
        .run(pipeline_request())
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.phase(PhaseId(3)).unwrap().status.is_failed());
    assert_eq!(harness.handler.calls_for(PhaseKind::Execute).len(), 2);
}

/// Test: A failing non-essential phase fails the run but not its siblings
#[tokio::test]
async fn test_failed_lookup_phase_leaves_work_running() {
    let handler = ScriptedHandler::new().on_kind(
        PhaseKind::ContextLookup,
        Script::Fatal("docs offline".to_string()),
    );
    let harness = Harness::new(handler);

    let report = harness
        .engine
        .run(pipeline_request())
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert!(report.phase(PhaseId(0)).unwrap().status.is_failed());
    for id in 1..=4 {
        assert!(report.phase(PhaseId(id)).unwrap().status.is_completed());
    }
    assert_eq!(report.status, RunStatus::Failed);
}

/// Test: Sequential phases hand their output forward
#[tokio::test]
async fn test_outputs_accumulate_across_phases() {
    let handler = ScriptedHandler::new()
        .on_kind(PhaseKind::Plan, Script::Reply("step list".to_string()));
    let harness = Harness::new(handler);

    harness.engine.run(pipeline_request()).await.unwrap();

    let execute = harness.handler.calls_for(PhaseKind::Execute);
    assert_eq!(execute.len(), 1);
    assert_eq!(execute[0].previous.as_deref(), Some("step list"));
}

#[tokio::test]
async fn test_cancelled_run_is_deferred() {
    let harness = Harness::new(ScriptedHandler::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harness
        .engine
        .run_with_cancellation(pipeline_request(), cancel)
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.status, RunStatus::Deferred);
    assert!(report
        .phases
        .iter()
        .all(|p| matches!(p.status, PhaseStatus::Deferred { .. })));
    assert!(harness.handler.calls().is_empty());
}
