use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{PublishError, PublishResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Stable,
    Testing,
    Planned,
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProfileStatus::Stable => "stable",
            ProfileStatus::Testing => "testing",
            ProfileStatus::Planned => "planned",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = PublishError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "stable" => Ok(ProfileStatus::Stable),
            "testing" => Ok(ProfileStatus::Testing),
            "planned" => Ok(ProfileStatus::Planned),
            other => Err(PublishError::Configuration(format!(
                "invalid profile status: {other}"
            ))),
        }
    }
}

/// Whether an expired processing/review wait fails the attempt or lets it
/// continue. Platforms whose review gate can silently reject content must be
/// `Hard`; platforms whose spinner is cosmetic can be `Soft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTimeoutPolicy {
    #[default]
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldConstraint {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldConstraints {
    #[serde(default)]
    pub title: FieldConstraint,
    #[serde(default)]
    pub description: FieldConstraint,
    #[serde(default)]
    pub location: FieldConstraint,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capabilities {
    #[serde(default)]
    pub supports_location: bool,
    #[serde(default)]
    pub requires_post_upload_review: bool,
    #[serde(default)]
    pub requires_explicit_upload_click: bool,
    #[serde(default)]
    pub suppresses_title: bool,
    #[serde(default)]
    pub supports_hashtags: bool,
    #[serde(default)]
    pub derives_short_title: bool,
}

/// Ordered lookup expressions per logical role; the first expression that
/// resolves to a live, visible element wins.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElementRefs {
    #[serde(default)]
    pub file_input: Vec<String>,
    #[serde(default)]
    pub upload_trigger: Vec<String>,
    #[serde(default)]
    pub title_input: Vec<String>,
    #[serde(default)]
    pub description_input: Vec<String>,
    #[serde(default)]
    pub location_input: Vec<String>,
    #[serde(default)]
    pub location_option: Vec<String>,
    #[serde(default)]
    pub processing_ready: Vec<String>,
    #[serde(default)]
    pub processing_failed: Vec<String>,
    #[serde(default)]
    pub publish_button: Vec<String>,
    #[serde(default)]
    pub success_marker: Vec<String>,
    #[serde(default)]
    pub error_marker: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformUrls {
    pub upload: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub dashboard: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaConstraints {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingBudget {
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_ms: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_ms: u64,
    #[serde(default)]
    pub processing_timeout_ms: Option<u64>,
    #[serde(default)]
    pub review_timeout_ms: Option<u64>,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_publish_settle")]
    pub publish_settle_ms: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_page_load_timeout() -> u64 {
    15_000
}

fn default_upload_timeout() -> u64 {
    60_000
}

fn default_publish_timeout() -> u64 {
    10_000
}

fn default_publish_settle() -> u64 {
    3_000
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_max_retries() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    2_000
}

impl Default for TimingBudget {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: default_page_load_timeout(),
            upload_timeout_ms: default_upload_timeout(),
            processing_timeout_ms: None,
            review_timeout_ms: None,
            publish_timeout_ms: default_publish_timeout(),
            publish_settle_ms: default_publish_settle(),
            retry_delay_ms: default_retry_delay(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl TimingBudget {
    /// Effective deadline for the post-upload wait. `review_timeout_ms`
    /// takes precedence when a platform distinguishes review from plain
    /// transcoding.
    pub fn processing_deadline_ms(&self) -> u64 {
        self.review_timeout_ms
            .or(self.processing_timeout_ms)
            .unwrap_or(30_000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    pub display_name: String,
    pub status: ProfileStatus,
    pub urls: PlatformUrls,
    #[serde(default)]
    pub fields: FieldConstraints,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub element_refs: ElementRefs,
    #[serde(default)]
    pub publish_button_label: Option<String>,
    #[serde(default)]
    pub media: MediaConstraints,
    #[serde(default)]
    pub timing: TimingBudget,
    #[serde(default)]
    pub review_timeout_policy: ReviewTimeoutPolicy,
}

impl PlatformProfile {
    pub fn is_available(&self) -> bool {
        self.status != ProfileStatus::Planned
    }

    /// Structural invariants every registered profile must satisfy.
    pub fn validate(&self) -> PublishResult<()> {
        if self.id.trim().is_empty() {
            return Err(PublishError::Configuration(
                "platform profile missing id".to_string(),
            ));
        }
        if self.element_refs.file_input.is_empty() {
            return Err(PublishError::Configuration(format!(
                "profile {} defines no file_input lookup",
                self.id
            )));
        }
        if self.element_refs.title_input.is_empty() && self.element_refs.description_input.is_empty()
        {
            return Err(PublishError::Configuration(format!(
                "profile {} defines neither title_input nor description_input lookups",
                self.id
            )));
        }
        if self.element_refs.publish_button.is_empty() {
            return Err(PublishError::Configuration(format!(
                "profile {} defines no publish_button lookup",
                self.id
            )));
        }
        for (field, constraint) in [
            ("title", &self.fields.title),
            ("description", &self.fields.description),
            ("location", &self.fields.location),
        ] {
            if let (Some(max), Some(min)) = (constraint.max_length, constraint.min_length) {
                if max < min {
                    return Err(PublishError::Configuration(format!(
                        "profile {} field {field}: max_length {max} < min_length {min}",
                        self.id
                    )));
                }
            }
        }
        url::Url::parse(&self.urls.upload).map_err(|err| {
            PublishError::Configuration(format!(
                "profile {} has invalid upload url: {err}",
                self.id
            ))
        })?;
        Ok(())
    }
}

/// Deserialization target for `platforms.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSet {
    pub platforms: Vec<PlatformProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<PlatformProfile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(set: ProfileSet) -> PublishResult<Self> {
        let mut registry = Self::new();
        for profile in set.platforms {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, profile: PlatformProfile) -> PublishResult<()> {
        profile.validate()?;
        self.profiles
            .insert(profile.id.clone(), Arc::new(profile));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<PlatformProfile>> {
        self.profiles.get(id).map(Arc::clone)
    }

    /// Resolve a profile for publishing. Unknown ids and `planned`
    /// platforms are programmer errors, not attempt failures.
    pub fn available(&self, id: &str) -> PublishResult<Arc<PlatformProfile>> {
        let profile = self
            .get(id)
            .ok_or_else(|| PublishError::Configuration(format!("unknown platform: {id}")))?;
        if !profile.is_available() {
            return Err(PublishError::Configuration(format!(
                "platform {id} is not yet available (status: {})",
                profile.status
            )));
        }
        Ok(profile)
    }

    pub fn ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlatformProfile>> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
