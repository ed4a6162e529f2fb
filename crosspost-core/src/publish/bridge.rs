use async_trait::async_trait;
use chromiumoxide::page::Page;
use serde_json::Value;

use super::error::{PublishError, PublishResult};

/// Channel used to evaluate script expressions inside one browser
/// session/tab. One bridge addresses exactly one session; a session is
/// never shared by two concurrent attempts.
#[async_trait]
pub trait ScriptBridge: Send + Sync {
    async fn execute(&self, expression: &str) -> PublishResult<Value>;

    /// Stable label for logs and attempt records.
    fn session_label(&self) -> String;
}

/// Production bridge over a CDP page.
pub struct CdpScriptBridge {
    page: Page,
    label: String,
}

impl CdpScriptBridge {
    pub fn new(page: Page, label: impl Into<String>) -> Self {
        Self {
            page,
            label: label.into(),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl ScriptBridge for CdpScriptBridge {
    async fn execute(&self, expression: &str) -> PublishResult<Value> {
        let evaluation = self
            .page
            .evaluate(expression)
            .await
            .map_err(|err| PublishError::Bridge(format!("script evaluation failed: {err}")))?;
        evaluation
            .into_value::<Value>()
            .map_err(|err| PublishError::Unexpected(format!("script result decode failed: {err}")))
    }

    fn session_label(&self) -> String {
        self.label.clone()
    }
}
