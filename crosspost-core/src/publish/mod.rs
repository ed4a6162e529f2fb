mod adapter;
mod bridge;
mod content;
mod engine;
mod error;
mod orchestrator;
mod profile;
mod scripts;
mod telemetry;

pub use adapter::{adapt_content, prepare_content, validate_content};
pub use bridge::{CdpScriptBridge, ScriptBridge};
pub use content::{AdaptedContent, ContentPayload, MediaKind, MediaPayload, MediaRef};
pub use engine::{CancelHandle, FieldFill, Outcome, Phase, PublishAttempt, PublishEngine};
pub use error::{PublishError, PublishResult};
pub use orchestrator::{AggregateReport, Orchestrator, PlatformEntry, SettleStatus};
pub use profile::{
    Capabilities, ElementRefs, FieldConstraint, FieldConstraints, MediaConstraints,
    PlatformProfile, PlatformUrls, ProfileRegistry, ProfileSet, ProfileStatus,
    ReviewTimeoutPolicy, TimingBudget,
};
pub use telemetry::{FailureCategory, FailureRecord, PublishTelemetry, TelemetryError};
