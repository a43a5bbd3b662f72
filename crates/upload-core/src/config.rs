use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_URL: &str = "http://axxonnet.test/api/v1/faceLists/1/faces/bulk";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub corpus: CorpusConfig,
    pub load: LoadConfig,
    pub memory: MemoryConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject values the dispatcher or uploader cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.url.trim().is_empty() {
            return Err(ConfigError::Invalid("target.url must not be empty".into()));
        }
        url::Url::parse(&self.target.url)
            .map_err(|e| ConfigError::Invalid(format!("target.url {:?}: {e}", self.target.url)))?;
        if self.target.timeout_ms == 0 {
            return Err(ConfigError::Invalid("target.timeout_ms must be at least 1".into()));
        }
        if self.load.concurrency == 0 {
            return Err(ConfigError::Invalid("load.concurrency must be at least 1".into()));
        }
        if self.load.progress_every == 0 {
            return Err(ConfigError::Invalid("load.progress_every must be at least 1".into()));
        }
        if self.corpus.extensions.is_empty() {
            return Err(ConfigError::Invalid("corpus.extensions must not be empty".into()));
        }
        if self.memory.mode != MemoryMode::None && self.memory.target_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "memory.target_id is required for memory mode {:?}",
                self.memory.mode
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Upload endpoint receiving the multipart POST
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`
    pub bearer_token: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub origin: String,
    pub referer: String,
    pub user_agent: String,
    /// Value of the `Time-Zone` header
    pub time_zone: String,
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            bearer_token: "your-bearer-token-here".to_string(),
            timeout_ms: 30_000,
            origin: "http://axxonnet.test".to_string(),
            referer: "http://axxonnet.test/".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            time_zone: "Europe/Moscow".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Directory holding the upload payloads
    pub path: PathBuf,
    /// Accepted file extensions without the dot; matched case-sensitively
    pub extensions: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("1"),
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Number of uploads issued over the whole run
    pub total_requests: u64,
    /// Maximum units holding a permit at once
    pub concurrency: u32,
    /// Sleep after each upload, charged against the unit's permit
    pub pacing_ms: u64,
    /// Log a progress line for every Nth successful request number
    pub progress_every: u64,
}

impl LoadConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            total_requests: 1000,
            concurrency: 10,
            pacing_ms: 20,
            progress_every: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// `docker stats` for a container id or name
    Docker,
    /// Resident memory of a local process id
    Process,
    /// Skip memory sampling
    None,
}

impl std::str::FromStr for MemoryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(Self::Docker),
            "process" => Ok(Self::Process),
            "none" => Ok(Self::None),
            other => Err(ConfigError::Invalid(format!(
                "invalid memory mode: {other}, must be 'docker', 'process' or 'none'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub mode: MemoryMode,
    /// Container id/name (docker) or pid (process)
    pub target_id: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Docker,
            target_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[target]
url = "http://localhost:8080/upload"
bearer_token = "secret"
timeout_ms = 5000

[corpus]
path = "images"
extensions = ["png"]

[load]
total_requests = 200
concurrency = 4
pacing_ms = 5

[memory]
mode = "process"
target_id = "4242"
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.target.url, "http://localhost:8080/upload");
        assert_eq!(config.target.bearer_token, "secret");
        assert_eq!(config.target.timeout(), Duration::from_secs(5));
        assert_eq!(config.target.time_zone, "Europe/Moscow");
        assert_eq!(config.corpus.path, PathBuf::from("images"));
        assert_eq!(config.corpus.extensions, vec!["png".to_string()]);
        assert_eq!(config.load.total_requests, 200);
        assert_eq!(config.load.concurrency, 4);
        assert_eq!(config.load.pacing(), Duration::from_millis(5));
        assert_eq!(config.load.progress_every, 50);
        assert_eq!(config.memory.mode, MemoryMode::Process);
        assert_eq!(config.memory.target_id, "4242");
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.target.url, DEFAULT_URL);
        assert_eq!(config.target.timeout(), Duration::from_secs(30));
        assert_eq!(config.load.total_requests, 1000);
        assert_eq!(config.load.concurrency, 10);
        assert_eq!(config.load.pacing(), Duration::from_millis(20));
        assert_eq!(config.corpus.extensions, vec!["jpg", "jpeg", "png"]);
        assert_eq!(config.memory.mode, MemoryMode::Docker);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.memory.mode = MemoryMode::None;
        config.load.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_memory_target() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.memory.target_id = "upload-api".into();
        assert!(config.validate().is_ok());

        config.memory.mode = MemoryMode::None;
        config.memory.target_id.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.memory.mode = MemoryMode::None;
        config.target.url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_mode_from_str() {
        assert_eq!("docker".parse::<MemoryMode>().unwrap(), MemoryMode::Docker);
        assert_eq!("none".parse::<MemoryMode>().unwrap(), MemoryMode::None);
        assert!("cgroup".parse::<MemoryMode>().is_err());
    }
}
