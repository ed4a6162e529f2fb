pub mod config;
pub mod error;
pub mod publish;

pub use config::{
    load_platform_profiles, load_publisher_config, ConfigBundle, ObservabilitySection,
    OrchestratorSection, PathsSection, PublisherConfig,
};
pub use error::{ConfigError, Result};
pub use publish::{
    adapt_content, validate_content, AdaptedContent, AggregateReport, CancelHandle, ContentPayload,
    FailureCategory, FieldFill, MediaKind, MediaPayload, MediaRef, Orchestrator, Outcome, Phase,
    PlatformProfile, ProfileRegistry, ProfileSet, PublishAttempt, PublishEngine, PublishError,
    PublishResult, PublishTelemetry, ScriptBridge,
};
