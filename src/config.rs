use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::constants::{DEFAULT_DRAFT_CEILING, PING_PATH, UPLOAD_PATH};
use crate::error::ConfigError;

fn default_draft_ceiling() -> u64 {
    DEFAULT_DRAFT_CEILING
}

fn default_ping_interval_ms() -> u64 {
    1000
}

fn default_ping_timeout_ms() -> u64 {
    5000
}

fn default_upload_timeout_secs() -> u64 {
    300
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_true() -> bool {
    true
}

/// Engine configuration file structure (TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the SQLite database and the engine lock file
    pub data_dir: PathBuf,
    /// Capture cache directory; finished videos live here and are scanned for orphans
    pub cache_dir: PathBuf,
    /// Server base URL (e.g., http://evidence.example:8080/)
    pub api_base_url: String,
    /// Officer identifier used when a command does not name one
    pub officer_id: String,
    /// Pending records (DRAFT + SYNCING) at which new captures are refused (default: 10)
    #[serde(default = "default_draft_ceiling")]
    pub draft_ceiling: u64,
    /// Minimum spacing between fast pings in milliseconds (default: 1000)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Per-ping request timeout in milliseconds (default: 5000)
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Per-upload request timeout in seconds (default: 300)
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Extension of video files in the capture cache, without the dot (default: mp4)
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    /// Stream frame samples to the detection endpoint while recording (default: true)
    #[serde(default = "default_true")]
    pub fast_ping: bool,
    /// Start a heavy upload as soon as a capture is finished (default: false)
    #[serde(default)]
    pub auto_upload: bool,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.draft_ceiling == 0 {
            return Err(ConfigError::Invalid("draft_ceiling must be at least 1".to_string()));
        }
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ping_interval_ms and ping_timeout_ms must be positive".to_string(),
            ));
        }
        if self.upload_timeout_secs == 0 {
            return Err(ConfigError::Invalid("upload_timeout_secs must be positive".to_string()));
        }
        if self.video_extension.trim().trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid("video_extension must not be empty".to_string()));
        }
        if self.officer_id.trim().is_empty() {
            return Err(ConfigError::Invalid("officer_id must not be empty".to_string()));
        }
        self.base_url()?;
        Ok(())
    }

    /// Base URL with a trailing slash so endpoint paths join beneath it
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.api_base_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::Invalid("api_base_url must not be empty".to_string()));
        }
        let with_slash = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{}/", raw)
        };
        Url::parse(&with_slash)
            .map_err(|e| ConfigError::Invalid(format!("api_base_url '{}': {}", raw, e)))
    }

    pub fn ping_endpoint(&self) -> Result<Url, ConfigError> {
        join_endpoint(&self.base_url()?, PING_PATH)
    }

    pub fn upload_endpoint(&self) -> Result<Url, ConfigError> {
        join_endpoint(&self.base_url()?, UPLOAD_PATH)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Extension normalized to lowercase without a leading dot
    pub fn normalized_extension(&self) -> String {
        self.video_extension
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase()
    }
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url, ConfigError> {
    base.join(path)
        .map_err(|e| ConfigError::Invalid(format!("cannot build endpoint '{}': {}", path, e)))
}
