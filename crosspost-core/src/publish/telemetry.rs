use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use super::engine::PublishAttempt;
use super::error::PublishError;

/// Coarse failure classes, recorded so operators can tell retryable
/// infrastructure trouble from platform-side rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    Validation,
    ElementNotFound,
    BridgeTransport,
    Timeout,
    PlatformRejection,
    Cancelled,
    Configuration,
    Unexpected,
}

impl FailureCategory {
    pub fn categorize(error: &PublishError) -> Self {
        match error {
            PublishError::Validation(_) => FailureCategory::Validation,
            PublishError::ElementNotFound { .. } => FailureCategory::ElementNotFound,
            PublishError::Bridge(_) => FailureCategory::BridgeTransport,
            PublishError::Timeout(_) => FailureCategory::Timeout,
            PublishError::PlatformRejection(_) => FailureCategory::PlatformRejection,
            PublishError::Cancelled => FailureCategory::Cancelled,
            PublishError::Configuration(_) => FailureCategory::Configuration,
            PublishError::Unexpected(_) => FailureCategory::Unexpected,
        }
    }

    /// Whether a fresh attempt against the same platform is worth trying
    /// without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureCategory::BridgeTransport
                | FailureCategory::Timeout
                | FailureCategory::ElementNotFound
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub attempt_id: String,
    pub platform: String,
    pub phase: String,
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSONL failure log plus a sqlite metrics database; shared by all
/// concurrently running engines (internally synchronized).
#[derive(Debug)]
pub struct PublishTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl PublishTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS publish_attempts (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                attempt_id TEXT,
                platform TEXT,
                session TEXT,
                outcome TEXT,
                message TEXT,
                failed_fields TEXT,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_publish_attempts_ts ON publish_attempts(ts DESC);
            CREATE TABLE IF NOT EXISTS publish_failures (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                attempt_id TEXT,
                platform TEXT,
                phase TEXT,
                category TEXT,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_publish_failures_ts ON publish_failures(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_attempt(&self, attempt: &PublishAttempt) -> Result<(), TelemetryError> {
        let duration_ms = attempt
            .finished_at
            .map(|finished| (finished - attempt.started_at).num_milliseconds())
            .unwrap_or_default();
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO publish_attempts (
                attempt_id, platform, session, outcome, message, failed_fields, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.attempt_id.to_string(),
                attempt.platform,
                attempt.session,
                attempt
                    .outcome
                    .map(|outcome| format!("{outcome:?}"))
                    .unwrap_or_default(),
                attempt.message.clone().unwrap_or_default(),
                attempt.failed_fields().join(","),
                duration_ms,
            ],
        )?;
        Ok(())
    }

    pub fn record_failure(&self, record: &FailureRecord) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(record)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO publish_failures (attempt_id, platform, phase, category, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.attempt_id,
                record.platform,
                record.phase,
                format!("{:?}", record.category),
                record.message,
            ],
        )?;
        Ok(())
    }

    pub fn record_engine_failure(
        &self,
        attempt: &PublishAttempt,
        error: &PublishError,
    ) -> Result<(), TelemetryError> {
        let record = FailureRecord {
            timestamp: Utc::now(),
            attempt_id: attempt.attempt_id.to_string(),
            platform: attempt.platform.clone(),
            phase: attempt.phase.to_string(),
            category: FailureCategory::categorize(error),
            message: error.to_string(),
        };
        self.record_failure(&record)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn categorize_distinguishes_infrastructure_from_rejection() {
        let timeout = PublishError::Timeout("publish button readiness".into());
        assert!(FailureCategory::categorize(&timeout).is_retryable());
        let rejection = PublishError::PlatformRejection("content removed".into());
        assert!(!FailureCategory::categorize(&rejection).is_retryable());
        let validation = PublishError::Validation(vec!["missing title".into()]);
        assert!(!FailureCategory::categorize(&validation).is_retryable());
    }

    #[test]
    fn telemetry_persists_entries() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("failures.log");
        let db_path = dir.path().join("metrics.sqlite");
        let telemetry = PublishTelemetry::new(&log_path, &db_path).unwrap();

        let attempt =
            PublishAttempt::rejected("douyin", "session-1", "upload timed out".to_string());
        telemetry.record_attempt(&attempt).unwrap();
        telemetry
            .record_engine_failure(&attempt, &PublishError::Timeout("media upload".into()))
            .unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_contents.contains("media upload"));

        let conn = Connection::open(&db_path).unwrap();
        let attempts: i64 = conn
            .query_row("SELECT COUNT(*) FROM publish_attempts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attempts, 1);
        let failures: i64 = conn
            .query_row("SELECT COUNT(*) FROM publish_failures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failures, 1);
    }
}
