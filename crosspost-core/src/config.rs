use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::publish::ProfileSet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PublisherConfig {
    pub paths: PathsSection,
    pub orchestrator: OrchestratorSection,
    pub observability: ObservabilitySection,
}

impl PublisherConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.resolve_path(&self.observability.failure_log)
    }

    pub fn metrics_db_path(&self) -> PathBuf {
        self.resolve_path(&self.observability.metrics_db)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    pub max_concurrent_attempts: u32,
    pub record_attempts: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub failure_log: String,
    pub metrics_db: String,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub publisher: PublisherConfig,
    pub platforms: ProfileSet,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let publisher = load_publisher_config(dir.join("publisher.toml"))?;
        let platforms = load_platform_profiles(dir.join("platforms.toml"))?;
        Ok(Self {
            publisher,
            platforms,
        })
    }
}

pub fn load_publisher_config<P: AsRef<Path>>(path: P) -> Result<PublisherConfig> {
    load_toml(path)
}

pub fn load_platform_profiles<P: AsRef<Path>>(path: P) -> Result<ProfileSet> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("configs should parse");
        assert!(bundle.publisher.orchestrator.max_concurrent_attempts >= 2);
        assert!(bundle.platforms.platforms.len() >= 4);
        let wechat = bundle
            .platforms
            .platforms
            .iter()
            .find(|profile| profile.id == "wechat-channels")
            .expect("wechat-channels profile present");
        assert!(wechat.capabilities.derives_short_title);
    }
}
