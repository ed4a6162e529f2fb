use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::adapter::{prepare_content, validate_media_size};
use super::bridge::ScriptBridge;
use super::content::{ContentPayload, MediaPayload};
use super::engine::{PublishAttempt, PublishEngine};
use super::error::{PublishError, PublishResult};
use super::profile::{PlatformProfile, ProfileRegistry};
use super::telemetry::PublishTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStatus {
    Fulfilled,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformEntry {
    pub platform: String,
    pub settled: SettleStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<PublishAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of one `publish_many` call. Entries preserve the caller's
/// platform order regardless of completion order.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub total_platforms: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<PlatformEntry>,
}

impl AggregateReport {
    fn from_entries(results: Vec<PlatformEntry>) -> Self {
        let total_platforms = results.len();
        let success_count = results.iter().filter(|entry| entry.success).count();
        Self {
            total_platforms,
            success_count,
            failure_count: total_platforms - success_count,
            results,
        }
    }
}

/// Runs publish attempts against registered platforms, one engine per
/// (platform, session), and aggregates their outcomes. Platform-side
/// failures never surface as errors; only malformed input does.
pub struct Orchestrator {
    registry: ProfileRegistry,
    telemetry: Option<Arc<PublishTelemetry>>,
    max_concurrent: Option<usize>,
}

impl Orchestrator {
    pub fn new(registry: ProfileRegistry) -> Self {
        Self {
            registry,
            telemetry: None,
            max_concurrent: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<PublishTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// One platform, driven to its terminal attempt record. `Err` only for
    /// programmer errors (unknown/unavailable platform).
    pub async fn publish_single(
        &self,
        platform_id: &str,
        bridge: Arc<dyn ScriptBridge>,
        content: &ContentPayload,
    ) -> PublishResult<PublishAttempt> {
        let profile = self.registry.available(platform_id)?;
        let payload = match MediaPayload::load(&content.media).await {
            Ok(payload) => payload,
            Err(error) => {
                return Ok(reject(
                    &profile,
                    &bridge.session_label(),
                    &error,
                    self.telemetry.as_deref(),
                ));
            }
        };
        Ok(run_prepared(
            profile,
            bridge,
            content.clone(),
            payload,
            self.telemetry.clone(),
        )
        .await)
    }

    /// All platforms concurrently; every engine settles independently and
    /// one platform's failure never cancels a sibling. `platform_ids` and
    /// `bridges` pair up positionally; mismatched lengths, duplicate
    /// sessions, and unknown platforms are programmer errors.
    pub async fn publish_many(
        &self,
        platform_ids: &[String],
        bridges: Vec<Arc<dyn ScriptBridge>>,
        content: &ContentPayload,
    ) -> PublishResult<AggregateReport> {
        if platform_ids.is_empty() {
            return Err(PublishError::Configuration(
                "no platforms requested".to_string(),
            ));
        }
        if platform_ids.len() != bridges.len() {
            return Err(PublishError::Configuration(format!(
                "{} platforms but {} sessions supplied",
                platform_ids.len(),
                bridges.len()
            )));
        }
        if let Some(limit) = self.max_concurrent {
            if platform_ids.len() > limit {
                return Err(PublishError::Configuration(format!(
                    "{} platforms requested, limit is {limit}",
                    platform_ids.len()
                )));
            }
        }
        let mut sessions = HashSet::new();
        for bridge in &bridges {
            let label = bridge.session_label();
            if !sessions.insert(label.clone()) {
                return Err(PublishError::Configuration(format!(
                    "session {label} assigned to more than one platform"
                )));
            }
        }
        let profiles: Vec<Arc<PlatformProfile>> = platform_ids
            .iter()
            .map(|id| self.registry.available(id))
            .collect::<PublishResult<_>>()?;

        info!(platforms = platform_ids.len(), "starting multi-platform publish");

        let payload = match MediaPayload::load(&content.media).await {
            Ok(payload) => payload,
            Err(error) => {
                // Unreadable media fails every platform without touching
                // any browser session.
                let results = profiles
                    .iter()
                    .zip(&bridges)
                    .map(|(profile, bridge)| {
                        let attempt = reject(
                            profile,
                            &bridge.session_label(),
                            &error,
                            self.telemetry.as_deref(),
                        );
                        PlatformEntry {
                            platform: profile.id.clone(),
                            settled: SettleStatus::Fulfilled,
                            success: false,
                            error: attempt.message.clone(),
                            attempt: Some(attempt),
                        }
                    })
                    .collect();
                return Ok(AggregateReport::from_entries(results));
            }
        };

        let mut handles = Vec::with_capacity(platform_ids.len());
        for (profile, bridge) in profiles.into_iter().zip(bridges) {
            let content = content.clone();
            let payload = Arc::clone(&payload);
            let telemetry = self.telemetry.clone();
            handles.push(tokio::spawn(run_prepared(
                profile, bridge, content, payload, telemetry,
            )));
        }

        let settled = join_all(handles).await;
        let results: Vec<PlatformEntry> = settled
            .into_iter()
            .zip(platform_ids)
            .map(|(joined, platform_id)| match joined {
                Ok(attempt) => PlatformEntry {
                    platform: platform_id.clone(),
                    settled: SettleStatus::Fulfilled,
                    success: attempt.is_success(),
                    error: if attempt.is_success() {
                        None
                    } else {
                        attempt.message.clone()
                    },
                    attempt: Some(attempt),
                },
                Err(join_error) => {
                    warn!(
                        platform = %platform_id,
                        error = %join_error,
                        "publish task aborted"
                    );
                    PlatformEntry {
                        platform: platform_id.clone(),
                        settled: SettleStatus::Rejected,
                        success: false,
                        attempt: None,
                        error: Some(format!("publish task aborted: {join_error}")),
                    }
                }
            })
            .collect();

        let report = AggregateReport::from_entries(results);
        info!(
            total = report.total_platforms,
            succeeded = report.success_count,
            failed = report.failure_count,
            "multi-platform publish settled"
        );
        Ok(report)
    }
}

/// Validate, adapt, and run one engine. Free function so `publish_many`
/// can move it onto an independent task.
async fn run_prepared(
    profile: Arc<PlatformProfile>,
    bridge: Arc<dyn ScriptBridge>,
    content: ContentPayload,
    payload: Arc<MediaPayload>,
    telemetry: Option<Arc<PublishTelemetry>>,
) -> PublishAttempt {
    let session = bridge.session_label();
    let adapted = match prepare_content(&profile, &content) {
        Ok(adapted) => adapted,
        Err(error) => return reject(&profile, &session, &error, telemetry.as_deref()),
    };
    if let Some(finding) = validate_media_size(&profile, &payload) {
        let error = PublishError::Validation(vec![finding]);
        return reject(&profile, &session, &error, telemetry.as_deref());
    }
    let mut engine = PublishEngine::new(profile, bridge);
    if let Some(telemetry) = telemetry {
        engine = engine.with_telemetry(telemetry);
    }
    engine.run(adapted, payload).await
}

fn reject(
    profile: &PlatformProfile,
    session: &str,
    error: &PublishError,
    telemetry: Option<&PublishTelemetry>,
) -> PublishAttempt {
    warn!(platform = %profile.id, error = %error, "attempt rejected before engine start");
    let attempt = PublishAttempt::rejected(&profile.id, session, error.to_string());
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.record_engine_failure(&attempt, error) {
            warn!(error = %err, "failed to persist rejection record");
        }
        if let Err(err) = telemetry.record_attempt(&attempt) {
            warn!(error = %err, "failed to persist attempt record");
        }
    }
    attempt
}
