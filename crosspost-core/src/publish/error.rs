use thiserror::Error;

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("content validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("element not found for {role}")]
    ElementNotFound { role: String },
    #[error("bridge error: {0}")]
    Bridge(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("platform rejected publication: {0}")]
    PlatformRejection(String),
    #[error("attempt cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PublishError {
    pub fn element_not_found(role: &str) -> Self {
        PublishError::ElementNotFound {
            role: role.to_string(),
        }
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Unexpected(format!("payload decode failed: {err}"))
    }
}
