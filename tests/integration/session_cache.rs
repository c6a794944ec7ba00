//! Context cache integration tests.
//!
//! The cache is session-scoped: lookups made by any handler in any run of
//! the same engine are shared until `end_session`.

use maestro::core::PhaseKind;
use maestro::{ForcedStrategy, TaskFlags, TaskRequest};

use crate::fixtures::{login_request, Harness, ScriptedHandler};

#[tokio::test]
async fn test_lookups_are_shared_across_phases_and_runs() {
    let harness = Harness::new(ScriptedHandler::new());
    let request = TaskRequest::new("build the settings api endpoint")
        .with_flags(TaskFlags::default().with_strategy(ForcedStrategy::Pipeline));

    harness.engine.run(request.clone()).await.unwrap();
    assert_eq!(harness.lookup.calls(), 1);
    let stats = harness.engine.cache_stats().await;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);

    harness.engine.run(request).await.unwrap();
    assert_eq!(harness.lookup.calls(), 1);
}

#[tokio::test]
async fn test_end_session_drops_cache() {
    let harness = Harness::new(ScriptedHandler::new());
    harness.engine.run(login_request()).await.unwrap();
    assert!(!harness.engine.cache().is_empty().await);

    harness.engine.end_session().await;
    assert!(harness.engine.cache().is_empty().await);

    harness.engine.run(login_request()).await.unwrap();
    assert_eq!(harness.lookup.calls(), 2);
}

/// Test: Handlers that declare no lookup need get no lookup handle
#[tokio::test]
async fn test_lookup_only_for_handlers_that_need_it() {
    let harness = Harness::new(ScriptedHandler::new());
    harness
        .engine
        .run(TaskRequest::new("fix the flaky regression tests"))
        .await
        .unwrap();

    let calls = harness.handler.calls_for(PhaseKind::Execute);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].handler, "qa");
    assert!(!calls[0].had_lookup);
    assert_eq!(harness.lookup.calls(), 0);
}
