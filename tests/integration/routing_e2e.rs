//! Routing integration tests.
//!
//! These tests drive `Engine::route` and `Engine::run` from task text to
//! plan, checking the classification, assignment and strategy decisions.

use maestro::config::Thresholds;
use maestro::core::{
    ConcurrencyMode, ExecutionStrategy, Phase, PhaseId, PhaseKind, ReasoningDepth, WaveStrategy,
};
use maestro::routing::{Activation, ComplexityScore, ComplexityTier};
use maestro::{Error, ExecutionPlan, ForcedStrategy, Routing, RunStatus, TaskFlags, TaskRequest};

use crate::fixtures::{files, login_request, Harness, ScriptedHandler};

fn planned(harness: &Harness, request: &TaskRequest) -> maestro::RouteDecision {
    match harness.engine.route(request).unwrap() {
        Routing::Planned(decision) => *decision,
        other => panic!("expected a plan, got {:?}", other),
    }
}

/// Test: Login screen routes as a quick, single-phase task
/// Given "implement login screen" over two UI files
/// When the engine runs it
/// Then one sequential phase runs on the interface-layer handler
#[tokio::test]
async fn test_login_screen_quick_route() {
    let harness = Harness::new(ScriptedHandler::new());
    let decision = planned(&harness, &login_request());

    assert!((decision.score.value() - 0.2).abs() < 0.05);
    assert_eq!(decision.score.tier(), ComplexityTier::Quick);

    let top = decision.detection.top().unwrap();
    assert_eq!(top.domain.as_str(), "interface-layer");
    assert!(top.confidence >= 0.7);
    assert_eq!(top.activation, Activation::AutoSelected);
    for other in &decision.detection.matches[1..] {
        assert!(other.confidence >= 0.5);
        assert!(other.confidence <= top.confidence);
    }

    assert_eq!(decision.plan.strategy(), ExecutionStrategy::Single);
    assert_eq!(decision.plan.len(), 1);
    assert_eq!(decision.plan.phases()[0].mode, ConcurrencyMode::SequentialDependent);
    assert_eq!(decision.plan.reasoning(), None);

    let report = harness
        .engine
        .run(login_request())
        .await
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(harness.reasoning.requests().is_empty());
    let calls = harness.handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].handler, "frontend");
    assert!(calls[0].instruction.contains("[interface-layer] implement login screen"));
}

/// Test: An explicit enterprise strategy overrides the derived tier
/// Given "optimize application launch time" over 30 files, forced enterprise
/// When the engine routes it
/// Then the plan uses the enterprise wave with maximum reasoning
#[tokio::test]
async fn test_forced_enterprise_wave() {
    let harness = Harness::new(ScriptedHandler::new());
    let request = TaskRequest::new("optimize application launch time")
        .with_scope(files(30))
        .with_flags(TaskFlags::default().with_strategy(ForcedStrategy::Enterprise));

    let decision = planned(&harness, &request);
    assert_ne!(decision.score.tier(), ComplexityTier::Enterprise);
    assert_eq!(
        decision.plan.strategy(),
        ExecutionStrategy::Wave(WaveStrategy::Enterprise)
    );
    assert_eq!(decision.plan.reasoning(), Some(ReasoningDepth::Maximum));

    let kinds: Vec<PhaseKind> = decision.plan.phases().iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            PhaseKind::Analyze,
            PhaseKind::ArchitectureDecision,
            PhaseKind::Execute,
            PhaseKind::Validate
        ]
    );
    let execute = &decision.plan.phases()[2];
    assert_eq!(execute.mode, ConcurrencyMode::HierarchicalCoordinated);
    assert!(execute.coordinator.is_some());

    let report = harness
        .engine
        .run(request)
        .await
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.architecture_decision.is_some());
    assert_eq!(report.analysis.as_ref().unwrap().depth, ReasoningDepth::Maximum);
    assert_eq!(
        harness.reasoning.requests(),
        vec![("optimize application launch time".to_string(), ReasoningDepth::Maximum)]
    );
}

/// Test: Routing is deterministic
#[test]
fn test_routing_is_deterministic() {
    let harness = Harness::new(ScriptedHandler::new());
    let request = TaskRequest::new(
        "secure the api endpoint, then refactor the auth view and optimize the slow query",
    )
    .with_scope(["src/auth/**", "web/LoginView.tsx", "db/schema.sql"]);

    let first = planned(&harness, &request);
    for _ in 0..10 {
        let again = planned(&harness, &request);
        assert_eq!(again.score, first.score);
        assert_eq!(again.detection, first.detection);
        assert_eq!(again.assignment, first.assignment);
        assert_eq!(again.plan, first.plan);
    }
}

#[test]
fn test_tier_boundaries() {
    let thresholds = Thresholds::default();
    assert_eq!(ComplexityScore::from_value(0.25, &thresholds).tier(), ComplexityTier::Quick);
    assert_eq!(ComplexityScore::from_value(0.5, &thresholds).tier(), ComplexityTier::Standard);
    assert_eq!(ComplexityScore::from_value(0.85, &thresholds).tier(), ComplexityTier::Enterprise);
    assert_eq!(ComplexityScore::from_value(0.3, &thresholds).tier(), ComplexityTier::Standard);
    assert_eq!(ComplexityScore::from_value(0.7, &thresholds).tier(), ComplexityTier::Standard);
}

/// Test: Each selected subtask has exactly one primary owner
#[test]
fn test_single_owner_per_subtask() {
    let harness = Harness::new(ScriptedHandler::new());
    let request = TaskRequest::new(
        "secure the api endpoint, optimize the slow database query and update the ui screen",
    );
    let decision = planned(&harness, &request);

    let mut seen = Vec::new();
    for assigned in &decision.assignment.handlers {
        for subtask in &assigned.subtasks {
            assert!(!seen.contains(&subtask.domain), "{} assigned twice", subtask.domain);
            seen.push(subtask.domain.clone());
            assert_eq!(
                harness.engine.handlers().owner(&subtask.domain),
                Some(&assigned.handler)
            );
        }
    }
    assert!(seen.len() > 1);
}

#[tokio::test]
async fn test_unmatched_text_requires_domain_selection() {
    let harness = Harness::new(ScriptedHandler::new());
    let outcome = harness.engine.run(TaskRequest::new("do the thing")).await.unwrap();
    match outcome {
        maestro::Outcome::DomainSelectionRequired { suggestions } => {
            assert_eq!(suggestions.len(), 9);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(harness.handler.calls().is_empty());
}

#[test]
fn test_unknown_forced_domain_is_error() {
    let harness = Harness::new(ScriptedHandler::new());
    let request = TaskRequest::new("implement login screen")
        .with_flags(TaskFlags::default().with_domain("telepathy"));
    assert!(matches!(
        harness.engine.route(&request),
        Err(Error::UnknownDomain(_))
    ));
}

#[test]
fn test_cyclic_plan_rejected() {
    let phase = |id: usize, deps: &[usize]| {
        Phase::new(PhaseId(id), PhaseKind::Execute, ConcurrencyMode::SequentialDependent)
            .depends_on(deps.iter().map(|d| PhaseId(*d)))
    };
    let result = ExecutionPlan::new(
        ExecutionStrategy::Pipeline,
        vec![phase(0, &[1]), phase(1, &[0])],
        None,
    );
    assert!(result.is_err());

    let result = ExecutionPlan::new(
        ExecutionStrategy::Pipeline,
        vec![phase(0, &[]), phase(1, &[1])],
        None,
    );
    assert!(result.is_err());
}
