mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use common::{happy_response, test_profile, ScriptedBridge};
use crosspost_core::publish::{
    ContentPayload, Orchestrator, ProfileRegistry, PublishError, PublishTelemetry, ScriptBridge,
    SettleStatus,
};

fn registry(ids: &[&str]) -> ProfileRegistry {
    let mut registry = ProfileRegistry::new();
    for id in ids {
        registry.register(test_profile(id)).unwrap();
    }
    registry
}

fn never_ready_bridge(label: &str) -> Arc<ScriptedBridge> {
    ScriptedBridge::new(label, |script| {
        if script.contains("failedNode") {
            Ok(json!({"failed": false, "ready": false}))
        } else {
            Ok(happy_response(script))
        }
    })
}

#[tokio::test]
async fn publish_single_returns_terminal_attempt() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let orchestrator = Orchestrator::new(registry(&["alpha"]));
    let bridge = ScriptedBridge::happy("session-alpha");

    let attempt = orchestrator
        .publish_single("alpha", bridge, &content)
        .await
        .unwrap();

    assert!(attempt.is_success());
    assert_eq!(attempt.platform, "alpha");
}

#[tokio::test]
async fn unknown_platform_is_a_programmer_error() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let orchestrator = Orchestrator::new(registry(&["alpha"]));
    let bridge = ScriptedBridge::happy("session-alpha");

    let result = orchestrator.publish_single("nope", bridge, &content).await;
    assert!(matches!(result, Err(PublishError::Configuration(_))));
}

#[tokio::test]
async fn planned_platform_is_not_publishable() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let mut profile = test_profile("someday");
    profile.status = crosspost_core::publish::ProfileStatus::Planned;
    let mut registry = ProfileRegistry::new();
    registry.register(profile).unwrap();
    let orchestrator = Orchestrator::new(registry);
    let bridge = ScriptedBridge::happy("session-someday");

    let result = orchestrator.publish_single("someday", bridge, &content).await;
    assert!(matches!(result, Err(PublishError::Configuration(_))));
}

#[tokio::test]
async fn validation_failure_never_touches_the_session() {
    let dir = tempdir().unwrap();
    let mut content = common::content_with_media(&dir);
    content.description = None;
    let mut profile = test_profile("alpha");
    profile.fields.description.required = true;
    let mut registry = ProfileRegistry::new();
    registry.register(profile).unwrap();
    let orchestrator = Orchestrator::new(registry);
    let bridge = ScriptedBridge::happy("session-alpha");

    let attempt = orchestrator
        .publish_single("alpha", bridge.clone(), &content)
        .await
        .unwrap();

    assert!(!attempt.is_success());
    assert!(attempt
        .message
        .as_deref()
        .unwrap()
        .contains("requires a description"));
    assert_eq!(bridge.hits(), 0);
}

#[tokio::test]
async fn aggregate_counts_and_order_are_stable() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let orchestrator = Orchestrator::new(registry(&["alpha", "beta"]));

    // beta's file input never resolves; alpha publishes cleanly.
    let alpha = ScriptedBridge::happy("session-alpha");
    let beta = ScriptedBridge::new("session-beta", |script| {
        if script.contains("DataTransfer") {
            Ok(json!({"success": false, "error": "file input not found"}))
        } else {
            Ok(happy_response(script))
        }
    });

    let report = orchestrator
        .publish_many(
            &["alpha".to_string(), "beta".to_string()],
            vec![alpha as Arc<dyn ScriptBridge>, beta as Arc<dyn ScriptBridge>],
            &content,
        )
        .await
        .unwrap();

    assert_eq!(report.total_platforms, 2);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.success_count + report.failure_count, report.total_platforms);
    assert_eq!(report.results[0].platform, "alpha");
    assert_eq!(report.results[1].platform, "beta");
    assert!(report.results[0].success);
    assert!(!report.results[1].success);
    assert_eq!(report.results[1].settled, SettleStatus::Fulfilled);
    assert!(report.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("not found"));
}

#[tokio::test(start_paused = true)]
async fn slow_platform_never_delays_the_others() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);

    let mut slow_a = test_profile("slow-a");
    slow_a.capabilities.requires_post_upload_review = true;
    slow_a.timing.processing_timeout_ms = Some(60_000);
    slow_a.timing.poll_interval_ms = 1_000;
    let mut slow_b = test_profile("slow-b");
    slow_b.capabilities.requires_post_upload_review = true;
    slow_b.timing.processing_timeout_ms = Some(50_000);
    slow_b.timing.poll_interval_ms = 1_000;
    let fast = test_profile("fast");

    let mut registry = ProfileRegistry::new();
    registry.register(slow_a).unwrap();
    registry.register(slow_b).unwrap();
    registry.register(fast).unwrap();
    let orchestrator = Orchestrator::new(registry);

    let started = tokio::time::Instant::now();
    let report = orchestrator
        .publish_many(
            &[
                "slow-a".to_string(),
                "slow-b".to_string(),
                "fast".to_string(),
            ],
            vec![
                never_ready_bridge("session-a") as Arc<dyn ScriptBridge>,
                never_ready_bridge("session-b") as Arc<dyn ScriptBridge>,
                ScriptedBridge::happy("session-c") as Arc<dyn ScriptBridge>,
            ],
            &content,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 2);
    assert!(report.results[2].success, "fast platform unaffected");
    // Settling is concurrent: wall clock tracks the slowest attempt, not
    // the sum of both slow timeouts.
    assert!(
        elapsed < std::time::Duration::from_secs(70),
        "expected ~60s, got {elapsed:?}"
    );
    assert!(elapsed >= std::time::Duration::from_secs(50));
}

#[tokio::test]
async fn mismatched_platforms_and_sessions_are_rejected() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let orchestrator = Orchestrator::new(registry(&["alpha", "beta"]));

    let result = orchestrator
        .publish_many(
            &["alpha".to_string(), "beta".to_string()],
            vec![ScriptedBridge::happy("session-alpha") as Arc<dyn ScriptBridge>],
            &content,
        )
        .await;
    assert!(matches!(result, Err(PublishError::Configuration(_))));
}

#[tokio::test]
async fn one_session_cannot_serve_two_platforms() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let orchestrator = Orchestrator::new(registry(&["alpha", "beta"]));

    let result = orchestrator
        .publish_many(
            &["alpha".to_string(), "beta".to_string()],
            vec![
                ScriptedBridge::happy("shared-session") as Arc<dyn ScriptBridge>,
                ScriptedBridge::happy("shared-session") as Arc<dyn ScriptBridge>,
            ],
            &content,
        )
        .await;
    assert!(matches!(result, Err(PublishError::Configuration(_))));
}

#[tokio::test]
async fn unreadable_media_fails_every_platform_without_sessions() {
    let orchestrator = Orchestrator::new(registry(&["alpha", "beta"]));
    let content = ContentPayload::new("/definitely/not/here.mp4");
    let alpha = ScriptedBridge::happy("session-alpha");
    let beta = ScriptedBridge::happy("session-beta");

    let report = orchestrator
        .publish_many(
            &["alpha".to_string(), "beta".to_string()],
            vec![
                alpha.clone() as Arc<dyn ScriptBridge>,
                beta.clone() as Arc<dyn ScriptBridge>,
            ],
            &content,
        )
        .await
        .unwrap();

    assert_eq!(report.failure_count, 2);
    assert_eq!(alpha.hits(), 0);
    assert_eq!(beta.hits(), 0);
}

#[tokio::test]
async fn telemetry_records_failed_attempts() {
    let dir = tempdir().unwrap();
    let content = common::content_with_media(&dir);
    let telemetry = Arc::new(
        PublishTelemetry::new(
            dir.path().join("failures.log"),
            dir.path().join("metrics.sqlite"),
        )
        .unwrap(),
    );
    let orchestrator =
        Orchestrator::new(registry(&["alpha"])).with_telemetry(Arc::clone(&telemetry));
    let bridge = ScriptedBridge::new("session-alpha", |script| {
        if script.contains("DataTransfer") {
            Ok(json!({"success": false, "error": "file input not found"}))
        } else {
            Ok(happy_response(script))
        }
    });

    let attempt = orchestrator
        .publish_single("alpha", bridge, &content)
        .await
        .unwrap();
    assert!(!attempt.is_success());

    let conn = rusqlite::Connection::open(telemetry.database_path()).unwrap();
    let attempts: i64 = conn
        .query_row("SELECT COUNT(*) FROM publish_attempts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(attempts, 1);
    let failures: i64 = conn
        .query_row("SELECT COUNT(*) FROM publish_failures", [], |row| row.get(0))
        .unwrap();
    assert_eq!(failures, 1);
}
