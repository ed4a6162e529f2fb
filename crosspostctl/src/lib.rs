use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crosspost_core::publish::{
    adapt_content, validate_content, AggregateReport, CdpScriptBridge, ContentPayload,
    Orchestrator, ProfileRegistry, PublishAttempt, PublishError, PublishTelemetry, ScriptBridge,
};
use crosspost_core::{load_platform_profiles, load_publisher_config, PublisherConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] crosspost_core::ConfigError),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("browser session error: {0}")]
    Session(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "crosspost command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to publisher.toml
    #[arg(long, default_value = "configs/publisher.toml")]
    pub config: PathBuf,
    /// Alternate path to platforms.toml
    #[arg(long)]
    pub platforms_config: Option<PathBuf>,
    /// Alternate path to the metrics database
    #[arg(long)]
    pub metrics_db: Option<PathBuf>,
    /// Local auth token (required when CROSSPOSTCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered platforms and their status
    Platforms,
    /// Preview how content adapts to each platform
    Preview(PreviewArgs),
    /// Publish to a single platform over a live browser session
    Publish(PublishArgs),
    /// Publish to several platforms concurrently
    MultiPublish(MultiPublishArgs),
    /// Show recent failures from the metrics database
    Failures(FailuresArgs),
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Content payload file (JSON)
    #[arg(short, long)]
    pub content: PathBuf,
    /// Comma-separated platform ids (defaults to all registered)
    #[arg(short, long)]
    pub platforms: Option<String>,
    /// Template file supplying defaults for missing fields (JSON)
    #[arg(short, long)]
    pub template: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Target platform id
    #[arg(short, long)]
    pub platform: String,
    /// Content payload file (JSON)
    #[arg(short, long)]
    pub content: PathBuf,
    /// CDP websocket URL of the account's browser session
    #[arg(short, long)]
    pub session: String,
    /// Label used in logs and attempt records
    #[arg(long)]
    pub session_label: Option<String>,
    /// Template file supplying defaults for missing fields (JSON)
    #[arg(short, long)]
    pub template: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MultiPublishArgs {
    /// Content payload file (JSON)
    #[arg(short, long)]
    pub content: PathBuf,
    /// Sessions manifest (JSON list of {platform, ws_url, label?})
    #[arg(short, long)]
    pub sessions: PathBuf,
    /// Template file supplying defaults for missing fields (JSON)
    #[arg(short, long)]
    pub template: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FailuresArgs {
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Platforms => {
            let report = context.platforms();
            render(&report, cli.format)?;
        }
        Commands::Preview(args) => {
            let report = context.preview(args)?;
            render(&report, cli.format)?;
        }
        Commands::Publish(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(context.publish(args))?;
            render(&report, cli.format)?;
        }
        Commands::MultiPublish(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(context.multi_publish(args))?;
            render(&report, cli.format)?;
        }
        Commands::Failures(args) => {
            let report = context.failures(args)?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("CROSSPOSTCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    publisher: PublisherConfig,
    registry: ProfileRegistry,
    metrics_db: PathBuf,
    failure_log: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let publisher = load_publisher_config(&cli.config)?;
        let config_dir = cli
            .config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let platforms_path = cli
            .platforms_config
            .clone()
            .unwrap_or_else(|| config_dir.join("platforms.toml"));
        let profile_set = load_platform_profiles(&platforms_path)?;
        let registry = ProfileRegistry::from_set(profile_set)?;
        let metrics_db = cli
            .metrics_db
            .clone()
            .unwrap_or_else(|| publisher.metrics_db_path());
        let failure_log = publisher.failure_log_path();
        Ok(Self {
            publisher,
            registry,
            metrics_db,
            failure_log,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(self.registry.clone()).with_max_concurrent(
            self.publisher.orchestrator.max_concurrent_attempts as usize,
        );
        if self.publisher.orchestrator.record_attempts {
            match PublishTelemetry::new(&self.failure_log, &self.metrics_db) {
                Ok(telemetry) => {
                    orchestrator = orchestrator.with_telemetry(Arc::new(telemetry));
                }
                Err(err) => warn!(error = %err, "telemetry unavailable, continuing without"),
            }
        }
        orchestrator
    }

    fn load_content(&self, path: &Path, template: Option<&Path>) -> Result<ContentPayload> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| AppError::MissingResource(format!("content file {}", path.display())))?;
        let mut content: ContentPayload = serde_json::from_str(&raw)?;
        if let Some(template_path) = template {
            let raw = std::fs::read_to_string(template_path).map_err(|_| {
                AppError::MissingResource(format!("template file {}", template_path.display()))
            })?;
            let overrides: TemplateOverrides = serde_json::from_str(&raw)?;
            if content.title.is_none() {
                content.title = overrides.title;
            }
            if content.description.is_none() {
                content.description = overrides.description;
            }
            if content.location.is_none() {
                content.location = overrides.location;
            }
            if content.tags.is_empty() {
                content.tags = overrides.tags;
            }
        }
        Ok(content)
    }

    fn platforms(&self) -> PlatformsReport {
        let platforms = self
            .registry
            .iter()
            .map(|profile| PlatformSummary {
                id: profile.id.clone(),
                display_name: profile.display_name.clone(),
                status: profile.status.to_string(),
                available: profile.is_available(),
                formats: profile.media.formats.clone(),
            })
            .collect();
        PlatformsReport { platforms }
    }

    fn preview(&self, args: &PreviewArgs) -> Result<PreviewReport> {
        let content = self.load_content(&args.content, args.template.as_deref())?;
        let ids = match &args.platforms {
            Some(list) => list
                .split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            None => self.registry.ids(),
        };
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let profile = self
                .registry
                .get(&id)
                .ok_or_else(|| AppError::MissingResource(format!("platform {id}")))?;
            let adapted = adapt_content(&profile, &content);
            let errors = validate_content(&profile, &content, &adapted);
            entries.push(PreviewEntry {
                platform: id,
                display_name: profile.display_name.clone(),
                valid: errors.is_empty(),
                errors,
                title: adapted.title,
                description: adapted.description,
                location: adapted.location,
            });
        }
        Ok(PreviewReport { entries })
    }

    async fn publish(&self, args: &PublishArgs) -> Result<PublishReport> {
        let content = self.load_content(&args.content, args.template.as_deref())?;
        let profile = self.registry.available(&args.platform)?;
        let label = args
            .session_label
            .clone()
            .unwrap_or_else(|| format!("{}-session", args.platform));
        let mut session = LiveSession::connect(&args.session, &label).await?;
        session.goto(&profile.urls.upload).await?;

        let orchestrator = self.orchestrator();
        let attempt = orchestrator
            .publish_single(&args.platform, session.bridge(), &content)
            .await?;
        session.close().await;
        Ok(PublishReport { attempt })
    }

    async fn multi_publish(&self, args: &MultiPublishArgs) -> Result<MultiPublishReport> {
        let content = self.load_content(&args.content, args.template.as_deref())?;
        let raw = std::fs::read_to_string(&args.sessions).map_err(|_| {
            AppError::MissingResource(format!("sessions file {}", args.sessions.display()))
        })?;
        let specs: Vec<SessionSpec> = serde_json::from_str(&raw)?;
        if specs.is_empty() {
            return Err(AppError::MissingResource(
                "sessions manifest is empty".to_string(),
            ));
        }

        let mut platform_ids = Vec::with_capacity(specs.len());
        let mut sessions = Vec::with_capacity(specs.len());
        for spec in &specs {
            let profile = self.registry.available(&spec.platform)?;
            let label = spec
                .label
                .clone()
                .unwrap_or_else(|| format!("{}-session", spec.platform));
            let mut session = LiveSession::connect(&spec.ws_url, &label).await?;
            session.goto(&profile.urls.upload).await?;
            platform_ids.push(spec.platform.clone());
            sessions.push(session);
        }

        let bridges = sessions
            .iter()
            .map(|session| session.bridge())
            .collect::<Vec<_>>();
        let orchestrator = self.orchestrator();
        let report = orchestrator
            .publish_many(&platform_ids, bridges, &content)
            .await?;
        for session in &mut sessions {
            session.close().await;
        }
        Ok(MultiPublishReport { report })
    }

    fn failures(&self, args: &FailuresArgs) -> Result<FailuresReport> {
        if !self.metrics_db.exists() {
            return Err(AppError::MissingResource(format!(
                "metrics database {}",
                self.metrics_db.display()
            )));
        }
        let conn = Connection::open_with_flags(&self.metrics_db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut statement = conn.prepare(
            "SELECT ts, platform, phase, category, message
             FROM publish_failures ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = statement
            .query_map([args.limit as i64], |row| {
                Ok(FailureRow {
                    ts: row.get(0)?,
                    platform: row.get(1)?,
                    phase: row.get(2)?,
                    category: row.get(3)?,
                    message: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(FailuresReport { failures: rows })
    }
}

/// A connected CDP session plus the handler task that keeps it alive.
struct LiveSession {
    browser: chromiumoxide::Browser,
    handler_task: tokio::task::JoinHandle<()>,
    bridge: Arc<CdpScriptBridge>,
}

impl LiveSession {
    async fn connect(ws_url: &str, label: &str) -> Result<Self> {
        let (browser, mut handler) = chromiumoxide::Browser::connect(ws_url)
            .await
            .map_err(|err| AppError::Session(format!("connect to {ws_url} failed: {err}")))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "cdp handler reported error");
                }
            }
        });
        let pages = browser
            .pages()
            .await
            .map_err(|err| AppError::Session(format!("listing pages failed: {err}")))?;
        let page = match pages.into_iter().next() {
            Some(page) => page,
            None => {
                let params = CreateTargetParams::new("about:blank");
                browser
                    .new_page(params)
                    .await
                    .map_err(|err| AppError::Session(format!("opening page failed: {err}")))?
            }
        };
        Ok(Self {
            browser,
            handler_task,
            bridge: Arc::new(CdpScriptBridge::new(page, label)),
        })
    }

    async fn goto(&mut self, url: &str) -> Result<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(AppError::Session)?;
        self.bridge
            .page()
            .goto(params)
            .await
            .map_err(|err| AppError::Session(format!("navigation to {url} failed: {err}")))?;
        self.bridge
            .page()
            .wait_for_navigation()
            .await
            .map_err(|err| AppError::Session(format!("navigation to {url} failed: {err}")))?;
        Ok(())
    }

    fn bridge(&self) -> Arc<dyn ScriptBridge> {
        Arc::clone(&self.bridge) as Arc<dyn ScriptBridge>
    }

    async fn close(&mut self) {
        if let Err(err) = self.browser.close().await {
            debug!(error = %err, "browser close reported error");
        }
        self.handler_task.abort();
    }
}

#[derive(Debug, Default, Deserialize)]
struct TemplateOverrides {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SessionSpec {
    platform: String,
    ws_url: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlatformSummary {
    pub id: String,
    pub display_name: String,
    pub status: String,
    pub available: bool,
    pub formats: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlatformsReport {
    pub platforms: Vec<PlatformSummary>,
}

impl DisplayFallback for PlatformsReport {
    fn display(&self) -> String {
        let mut out = String::new();
        for platform in &self.platforms {
            let gate = if platform.available { "" } else { " (gated)" };
            let _ = writeln!(
                out,
                "{:<16} {:<20} {}{}",
                platform.id, platform.display_name, platform.status, gate
            );
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct PreviewEntry {
    pub platform: String,
    pub display_name: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewReport {
    pub entries: Vec<PreviewEntry>,
}

impl DisplayFallback for PreviewReport {
    fn display(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let verdict = if entry.valid {
                "ok".to_string()
            } else {
                entry.errors.join("; ")
            };
            let _ = writeln!(out, "{} ({}): {verdict}", entry.display_name, entry.platform);
            let _ = writeln!(out, "  title:       {}", entry.title.as_deref().unwrap_or("-"));
            let description = entry.description.as_deref().unwrap_or("-");
            let short: String = description.chars().take(60).collect();
            let suffix = if description.chars().count() > 60 { "…" } else { "" };
            let _ = writeln!(out, "  description: {short}{suffix}");
            let _ = writeln!(
                out,
                "  location:    {}",
                entry.location.as_deref().unwrap_or("-")
            );
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct PublishReport {
    pub attempt: PublishAttempt,
}

impl DisplayFallback for PublishReport {
    fn display(&self) -> String {
        let attempt = &self.attempt;
        let outcome = attempt
            .outcome
            .map(|outcome| format!("{outcome:?}"))
            .unwrap_or_else(|| "-".to_string());
        let mut out = format!(
            "{}: {} ({})",
            attempt.platform,
            outcome,
            attempt.message.as_deref().unwrap_or("no message")
        );
        for (field, fill) in &attempt.fields {
            let state = if fill.success {
                "filled".to_string()
            } else {
                format!("failed: {}", fill.error.as_deref().unwrap_or("unknown"))
            };
            let _ = write!(out, "\n  {field}: {state}");
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct MultiPublishReport {
    pub report: AggregateReport,
}

impl DisplayFallback for MultiPublishReport {
    fn display(&self) -> String {
        let report = &self.report;
        let mut out = format!(
            "{}/{} platforms succeeded ({} failed)",
            report.success_count, report.total_platforms, report.failure_count
        );
        for entry in &report.results {
            let mark = if entry.success { "+" } else { "-" };
            let detail = entry
                .error
                .as_deref()
                .unwrap_or("ok");
            let _ = write!(out, "\n {mark} {}: {detail}", entry.platform);
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct FailureRow {
    pub ts: String,
    pub platform: String,
    pub phase: String,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct FailuresReport {
    pub failures: Vec<FailureRow>,
}

impl DisplayFallback for FailuresReport {
    fn display(&self) -> String {
        if self.failures.is_empty() {
            return "no recorded failures".to_string();
        }
        let mut out = String::new();
        for row in &self.failures {
            let _ = writeln!(
                out,
                "{} {:<14} {:<22} {:<18} {}",
                row.ts, row.platform, row.phase, row.category, row.message
            );
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture_cli(config: PathBuf) -> Cli {
        Cli {
            config,
            platforms_config: None,
            metrics_db: None,
            token: None,
            format: OutputFormat::Text,
            command: Commands::Platforms,
        }
    }

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs")
    }

    #[test]
    fn context_loads_fixture_configs() {
        let cli = fixture_cli(fixtures_dir().join("publisher.toml"));
        let context = AppContext::new(&cli).unwrap();
        let report = context.platforms();
        assert!(report.platforms.len() >= 4);
        assert!(report
            .platforms
            .iter()
            .any(|platform| platform.id == "douyin"));
        let bilibili = report
            .platforms
            .iter()
            .find(|platform| platform.id == "bilibili")
            .unwrap();
        assert!(!bilibili.available);
    }

    #[test]
    fn preview_adapts_content_per_platform() {
        let dir = tempdir().unwrap();
        let content_path = dir.path().join("content.json");
        std::fs::write(
            &content_path,
            serde_json::json!({
                "title": "Harbor timelapse, fourteen mornings over the water",
                "description": "Fourteen mornings over the harbor. Shot on a tripod.",
                "location": "Lisbon",
                "tags": ["timelapse"],
                "media": {"path": "/videos/clip.mp4"}
            })
            .to_string(),
        )
        .unwrap();

        let cli = fixture_cli(fixtures_dir().join("publisher.toml"));
        let context = AppContext::new(&cli).unwrap();
        let report = context
            .preview(&PreviewArgs {
                content: content_path,
                platforms: Some("xiaohongshu,kuaishou".to_string()),
                template: None,
            })
            .unwrap();

        assert_eq!(report.entries.len(), 2);
        let xiaohongshu = &report.entries[0];
        assert_eq!(xiaohongshu.platform, "xiaohongshu");
        assert!(xiaohongshu.title.as_deref().unwrap().chars().count() <= 20);
        let kuaishou = &report.entries[1];
        assert!(kuaishou.title.is_none(), "kuaishou suppresses titles");
    }

    #[test]
    fn missing_token_is_rejected_when_required() {
        let cli = fixture_cli(fixtures_dir().join("publisher.toml"));
        std::env::set_var("CROSSPOSTCTL_TOKEN", "sekret");
        let result = enforce_token(&cli);
        std::env::remove_var("CROSSPOSTCTL_TOKEN");
        assert!(matches!(result, Err(AppError::Authentication)));
    }
}
