use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bridge::ScriptBridge;
use super::content::{AdaptedContent, MediaPayload};
use super::error::{PublishError, PublishResult};
use super::profile::{PlatformProfile, ReviewTimeoutPolicy};
use super::scripts;
use super::telemetry::PublishTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Uploading,
    WaitingProcessing,
    FillingForm,
    WaitingPublishReady,
    Publishing,
    VerifyingStatus,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Uploading => "uploading",
            Phase::WaitingProcessing => "waiting_processing",
            Phase::FillingForm => "filling_form",
            Phase::WaitingPublishReady => "waiting_publish_ready",
            Phase::Publishing => "publishing",
            Phase::VerifyingStatus => "verifying_status",
            Phase::Done => "done",
        };
        f.write_str(label)
    }
}

/// Terminal classification of one attempt. `Unknown` means the publish
/// action was taken but no status marker was observed; callers treat it as
/// a soft success. `PartialSuccess` is a publish that went through with one
/// or more form fields unfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialSuccess,
    Unknown,
    Failure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failure)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldFill {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete record of one engine run. Exclusively owned by its engine
/// while running; immutable once returned.
#[derive(Debug, Clone, Serialize)]
pub struct PublishAttempt {
    pub attempt_id: Uuid,
    pub platform: String,
    pub session: String,
    pub phase: Phase,
    pub fields: BTreeMap<String, FieldFill>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub message: Option<String>,
}

impl PublishAttempt {
    pub(crate) fn new(platform: &str, session: &str) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            platform: platform.to_string(),
            session: session.to_string(),
            phase: Phase::Idle,
            fields: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            message: None,
        }
    }

    /// Terminal record for an attempt rejected before any engine phase
    /// ran (validation failures never touch the browser).
    pub(crate) fn rejected(platform: &str, session: &str, message: String) -> Self {
        let mut attempt = Self::new(platform, session);
        attempt.phase = Phase::Done;
        attempt.finished_at = Some(Utc::now());
        attempt.outcome = Some(Outcome::Failure);
        attempt.message = Some(message);
        attempt
    }

    pub fn is_success(&self) -> bool {
        self.outcome.map(|outcome| outcome.is_success()).unwrap_or(false)
    }

    pub fn failed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, fill)| !fill.success)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Handle that aborts the owning engine's current wait. Cancelling one
/// engine never affects another.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// One publish attempt against one platform session. The state machine is
/// single-shot: a failed or finished engine is not reusable, a fresh
/// attempt needs a fresh engine.
pub struct PublishEngine {
    profile: Arc<PlatformProfile>,
    bridge: Arc<dyn ScriptBridge>,
    telemetry: Option<Arc<PublishTelemetry>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl PublishEngine {
    pub fn new(profile: Arc<PlatformProfile>, bridge: Arc<dyn ScriptBridge>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            profile,
            bridge,
            telemetry: None,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<PublishTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Drive the attempt to its terminal state. Platform-side failures are
    /// encoded in the returned record, never raised.
    pub async fn run(
        mut self,
        content: AdaptedContent,
        media: Arc<MediaPayload>,
    ) -> PublishAttempt {
        let mut attempt = PublishAttempt::new(&self.profile.id, &self.bridge.session_label());
        info!(
            platform = %self.profile.id,
            attempt = %attempt.attempt_id,
            "starting publish attempt"
        );

        let outcome = self.drive(&mut attempt, &content, &media).await;
        attempt.phase = Phase::Done;
        attempt.finished_at = Some(Utc::now());
        match outcome {
            Ok(outcome) => {
                attempt.outcome = Some(outcome);
                info!(
                    platform = %self.profile.id,
                    attempt = %attempt.attempt_id,
                    outcome = ?outcome,
                    "publish attempt finished"
                );
            }
            Err(error) => {
                attempt.outcome = Some(Outcome::Failure);
                attempt.message = Some(error.to_string());
                warn!(
                    platform = %self.profile.id,
                    attempt = %attempt.attempt_id,
                    error = %error,
                    "publish attempt failed"
                );
                if let Some(telemetry) = &self.telemetry {
                    if let Err(err) = telemetry.record_engine_failure(&attempt, &error) {
                        warn!(error = %err, "failed to persist failure record");
                    }
                }
            }
        }
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record_attempt(&attempt) {
                warn!(error = %err, "failed to persist attempt record");
            }
        }
        attempt
    }

    async fn drive(
        &mut self,
        attempt: &mut PublishAttempt,
        content: &AdaptedContent,
        media: &MediaPayload,
    ) -> PublishResult<Outcome> {
        attempt.phase = Phase::Uploading;
        self.upload(media).await?;

        if self.profile.capabilities.requires_post_upload_review {
            attempt.phase = Phase::WaitingProcessing;
            self.wait_processing(attempt).await?;
        }

        attempt.phase = Phase::FillingForm;
        self.fill_form(attempt, content).await?;

        attempt.phase = Phase::WaitingPublishReady;
        self.wait_publish_ready().await?;

        attempt.phase = Phase::Publishing;
        self.publish().await?;

        attempt.phase = Phase::VerifyingStatus;
        self.verify(attempt).await
    }

    async fn upload(&self, media: &MediaPayload) -> PublishResult<()> {
        let timing = &self.profile.timing;

        // Page readiness is best-effort: a stalled readyState surfaces as a
        // clearer element-not-found later rather than failing here.
        let deadline = Instant::now() + Duration::from_millis(timing.page_load_timeout_ms);
        loop {
            let ready = self
                .bridge
                .execute(&scripts::page_ready())
                .await
                .ok()
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            if ready {
                break;
            }
            if Instant::now() >= deadline {
                warn!(platform = %self.profile.id, "page never reported complete, continuing");
                break;
            }
            self.pause(Duration::from_millis(timing.poll_interval_ms))
                .await?;
        }

        if self.profile.capabilities.requires_explicit_upload_click {
            let script = scripts::click_element(&self.profile.element_refs.upload_trigger);
            let result = self.action(&script).await?;
            if !result.success {
                return Err(self.map_action_error("upload_trigger", result.error));
            }
            self.pause(Duration::from_millis(timing.retry_delay_ms))
                .await?;
        }

        let script = scripts::attach_media(&self.profile.element_refs.file_input, media);
        let upload_budget = Duration::from_millis(timing.upload_timeout_ms);
        let value = self
            .checked(timeout(upload_budget, self.bridge.execute(&script)))
            .await?
            .map_err(|_| PublishError::Timeout("media upload".to_string()))??;
        let result: scripts::ActionResult = serde_json::from_value(value)?;
        if !result.success {
            return Err(self.map_action_error("file_input", result.error));
        }
        debug!(platform = %self.profile.id, file = %media.file_name, "media attached");
        Ok(())
    }

    async fn wait_processing(&self, attempt: &mut PublishAttempt) -> PublishResult<()> {
        let timing = &self.profile.timing;
        let budget = Duration::from_millis(timing.processing_deadline_ms());
        let interval = Duration::from_millis(timing.poll_interval_ms);
        let deadline = Instant::now() + budget;
        let script = scripts::processing_state(
            &self.profile.element_refs.processing_ready,
            &self.profile.element_refs.processing_failed,
        );

        loop {
            let value = self.checked(self.bridge.execute(&script)).await??;
            let state: scripts::ProcessingState = serde_json::from_value(value)?;
            if state.failed {
                return Err(PublishError::PlatformRejection(
                    "processing/review failed signal observed".to_string(),
                ));
            }
            if state.ready {
                debug!(platform = %self.profile.id, "processing complete");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return match self.profile.review_timeout_policy {
                    ReviewTimeoutPolicy::Hard => {
                        Err(PublishError::Timeout("processing readiness".to_string()))
                    }
                    ReviewTimeoutPolicy::Soft => {
                        warn!(
                            platform = %self.profile.id,
                            "processing wait expired, continuing on soft policy"
                        );
                        attempt.message =
                            Some("processing readiness wait expired (soft)".to_string());
                        Ok(())
                    }
                };
            }
            self.pause(interval).await?;
        }
    }

    async fn fill_form(
        &self,
        attempt: &mut PublishAttempt,
        content: &AdaptedContent,
    ) -> PublishResult<()> {
        let refs = &self.profile.element_refs;
        let fields: [(&str, &[String], Option<&str>); 3] = [
            ("title", &refs.title_input, content.title.as_deref()),
            (
                "description",
                &refs.description_input,
                content.description.as_deref(),
            ),
            ("location", &refs.location_input, content.location.as_deref()),
        ];

        for (name, selectors, value) in fields {
            let Some(value) = value else { continue };
            let fill = if selectors.is_empty() {
                FieldFill {
                    success: false,
                    value: None,
                    error: Some(format!("no {name} lookup configured")),
                }
            } else {
                self.fill_field(name, selectors, value).await?
            };
            if fill.success && name == "location" {
                self.select_location_option().await?;
            }
            attempt.fields.insert(name.to_string(), fill);
        }
        Ok(())
    }

    /// One field, retried on its own budget. Exhausted retries mark the
    /// field failed without aborting the phase.
    async fn fill_field(
        &self,
        name: &str,
        selectors: &[String],
        value: &str,
    ) -> PublishResult<FieldFill> {
        let timing = &self.profile.timing;
        let max_attempts = timing.max_retries.max(1);
        let script = scripts::set_field_value(selectors, value);
        let mut last_error = String::new();

        for attempt_no in 1..=max_attempts {
            match self.action(&script).await {
                Ok(result) if result.success => {
                    debug!(platform = %self.profile.id, field = name, "field filled");
                    return Ok(FieldFill {
                        success: true,
                        value: Some(value.to_string()),
                        error: None,
                    });
                }
                Ok(result) => {
                    last_error = result.error.unwrap_or_else(|| "fill rejected".to_string());
                }
                Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
                Err(error) => {
                    last_error = error.to_string();
                }
            }
            if attempt_no < max_attempts {
                self.pause(self.retry_delay()).await?;
            }
        }
        warn!(
            platform = %self.profile.id,
            field = name,
            error = %last_error,
            "field fill exhausted retries"
        );
        Ok(FieldFill {
            success: false,
            value: None,
            error: Some(last_error),
        })
    }

    /// Best-effort pick of the first suggestion after a location fill;
    /// platforms that need no picker simply have no option lookups.
    async fn select_location_option(&self) -> PublishResult<()> {
        let selectors = &self.profile.element_refs.location_option;
        if selectors.is_empty() {
            return Ok(());
        }
        self.pause(self.retry_delay()).await?;
        let script = scripts::click_element(selectors);
        match self.action(&script).await {
            Ok(result) if !result.success => {
                debug!(platform = %self.profile.id, "no location suggestion appeared");
            }
            Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
            _ => {}
        }
        Ok(())
    }

    async fn wait_publish_ready(&self) -> PublishResult<()> {
        let timing = &self.profile.timing;
        let deadline = Instant::now() + Duration::from_millis(timing.publish_timeout_ms);
        let interval = Duration::from_millis(timing.poll_interval_ms);
        let script = scripts::publish_ready(
            &self.profile.element_refs.publish_button,
            self.profile.publish_button_label.as_deref(),
        );

        loop {
            let value = self.checked(self.bridge.execute(&script)).await??;
            let state: scripts::PublishReadyState = serde_json::from_value(value)?;
            if state.found && state.enabled && state.label_matches {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PublishError::Timeout("publish button readiness".to_string()));
            }
            self.pause(interval).await?;
        }
    }

    async fn publish(&self) -> PublishResult<()> {
        let script = scripts::click_element(&self.profile.element_refs.publish_button);
        let result = self.action(&script).await?;
        if !result.success {
            return Err(self.map_action_error("publish_button", result.error));
        }
        info!(platform = %self.profile.id, "publish activated");
        self.pause(Duration::from_millis(self.profile.timing.publish_settle_ms))
            .await
    }

    async fn verify(&self, attempt: &mut PublishAttempt) -> PublishResult<Outcome> {
        let script = scripts::verify_status(
            &self.profile.element_refs.success_marker,
            &self.profile.element_refs.error_marker,
        );
        let value = self.checked(self.bridge.execute(&script)).await??;
        let state: scripts::VerifyState = serde_json::from_value(value)?;
        match state.status.as_str() {
            "success" => {
                if let Some(message) = state.message {
                    attempt.message = Some(message);
                }
                if attempt.failed_fields().is_empty() {
                    Ok(Outcome::Success)
                } else {
                    Ok(Outcome::PartialSuccess)
                }
            }
            "error" => Err(PublishError::PlatformRejection(
                state
                    .message
                    .unwrap_or_else(|| "error marker observed".to_string()),
            )),
            _ => {
                attempt.message = Some("no status marker observed".to_string());
                Ok(Outcome::Unknown)
            }
        }
    }

    async fn action(&self, script: &str) -> PublishResult<scripts::ActionResult> {
        let value = self.checked(self.bridge.execute(script)).await??;
        Ok(serde_json::from_value(value)?)
    }

    fn map_action_error(&self, role: &str, error: Option<String>) -> PublishError {
        match error {
            Some(message) if message.contains("not found") => PublishError::ElementNotFound {
                role: role.to_string(),
            },
            Some(message) => PublishError::Unexpected(format!("{role} action failed: {message}")),
            None => PublishError::Unexpected(format!("{role} action failed")),
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = self.profile.timing.retry_delay_ms;
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }

    /// Race a future against this engine's cancel signal.
    async fn checked<F, T>(&self, fut: F) -> PublishResult<T>
    where
        F: std::future::Future<Output = T>,
    {
        let mut rx = self.cancel_rx.clone();
        tokio::select! {
            _ = rx.wait_for(|cancelled| *cancelled) => Err(PublishError::Cancelled),
            value = fut => Ok(value),
        }
    }

    async fn pause(&self, duration: Duration) -> PublishResult<()> {
        self.checked(sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_classification() {
        assert!(Outcome::Success.is_success());
        assert!(Outcome::PartialSuccess.is_success());
        assert!(Outcome::Unknown.is_success());
        assert!(!Outcome::Failure.is_success());
    }

    #[test]
    fn attempt_tracks_failed_fields() {
        let mut attempt = PublishAttempt::new("test", "session-1");
        attempt.fields.insert(
            "title".to_string(),
            FieldFill {
                success: true,
                value: Some("ok".to_string()),
                error: None,
            },
        );
        attempt.fields.insert(
            "location".to_string(),
            FieldFill {
                success: false,
                value: None,
                error: Some("element not found".to_string()),
            },
        );
        assert_eq!(attempt.failed_fields(), vec!["location"]);
        assert!(!attempt.is_success());
    }
}
