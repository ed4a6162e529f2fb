#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use crosspost_core::publish::{
    Capabilities, ContentPayload, ElementRefs, FieldConstraint, FieldConstraints,
    MediaConstraints, PlatformProfile, PlatformUrls, ProfileStatus, PublishError, PublishResult,
    ReviewTimeoutPolicy, ScriptBridge, TimingBudget,
};

type Handler = Box<dyn Fn(&str) -> PublishResult<Value> + Send + Sync>;

/// Bridge whose responses are driven by a closure inspecting the submitted
/// expression; counts round-trips so tests can assert a session was never
/// touched.
pub struct ScriptedBridge {
    label: String,
    hits: AtomicUsize,
    handler: Handler,
}

impl ScriptedBridge {
    pub fn new(
        label: &str,
        handler: impl Fn(&str) -> PublishResult<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            hits: AtomicUsize::new(0),
            handler: Box::new(handler),
        })
    }

    pub fn happy(label: &str) -> Arc<Self> {
        Self::new(label, |script| Ok(happy_response(script)))
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptBridge for ScriptedBridge {
    async fn execute(&self, expression: &str) -> PublishResult<Value> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        (self.handler)(expression)
    }

    fn session_label(&self) -> String {
        self.label.clone()
    }
}

/// Response set for a publish flow where everything works.
pub fn happy_response(script: &str) -> Value {
    if script.contains("document.readyState") {
        json!(true)
    } else if script.contains("DataTransfer") {
        json!({"success": true, "error": null})
    } else if script.contains("label_matches") {
        json!({"found": true, "enabled": true, "label_matches": true})
    } else if script.contains("failedNode") {
        json!({"failed": false, "ready": true})
    } else if script.contains("errorNode") {
        json!({"status": "success", "message": "published"})
    } else if script.contains("isContentEditable") {
        json!({"success": true, "error": null})
    } else if script.contains("node.click()") {
        json!({"success": true, "error": null})
    } else {
        json!(null)
    }
}

/// Profile with distinctive selectors per role and a timing budget small
/// enough for fast test runs.
pub fn test_profile(id: &str) -> PlatformProfile {
    PlatformProfile {
        id: id.to_string(),
        display_name: format!("Test {id}"),
        status: ProfileStatus::Testing,
        urls: PlatformUrls {
            upload: format!("https://creator.{id}.example/upload"),
            login: None,
            dashboard: None,
        },
        fields: FieldConstraints {
            title: FieldConstraint {
                required: false,
                max_length: Some(60),
                min_length: None,
            },
            description: FieldConstraint {
                required: false,
                max_length: Some(500),
                min_length: None,
            },
            location: FieldConstraint::default(),
        },
        capabilities: Capabilities {
            supports_location: true,
            ..Capabilities::default()
        },
        element_refs: ElementRefs {
            file_input: vec!["#file-input".to_string()],
            upload_trigger: vec!["#upload-trigger".to_string()],
            title_input: vec!["#title-field".to_string()],
            description_input: vec!["#description-field".to_string()],
            location_input: vec!["#location-field".to_string()],
            location_option: Vec::new(),
            processing_ready: vec!["#processing-done".to_string()],
            processing_failed: vec!["#processing-error".to_string()],
            publish_button: vec!["#publish-button".to_string()],
            success_marker: vec!["#success-toast".to_string()],
            error_marker: vec!["#error-toast".to_string()],
        },
        publish_button_label: None,
        media: MediaConstraints::default(),
        timing: TimingBudget {
            page_load_timeout_ms: 50,
            upload_timeout_ms: 200,
            processing_timeout_ms: Some(100),
            review_timeout_ms: None,
            publish_timeout_ms: 100,
            publish_settle_ms: 5,
            retry_delay_ms: 5,
            max_retries: 2,
            poll_interval_ms: 10,
        },
        review_timeout_policy: ReviewTimeoutPolicy::Hard,
    }
}

/// Content payload backed by a real media file under `dir`.
pub fn content_with_media(dir: &TempDir) -> ContentPayload {
    let media_path = dir.path().join("clip.mp4");
    std::fs::write(&media_path, b"not really a video").unwrap();
    let mut content = ContentPayload::new(&media_path);
    content.title = Some("Harbor timelapse".to_string());
    content.description = Some("Fourteen mornings over the harbor.".to_string());
    content.location = Some("Lisbon".to_string());
    content
}

/// Convenience for tests that force one role's lookup to fail: returns the
/// happy response except for scripts touching `selector`.
pub fn failing_selector_response(script: &str, selector: &str) -> Value {
    if script.contains(selector) && script.contains("isContentEditable") {
        json!({"success": false, "error": "element not found"})
    } else {
        happy_response(script)
    }
}

pub fn bridge_error(message: &str) -> PublishError {
    PublishError::Bridge(message.to_string())
}
