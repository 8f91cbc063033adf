//! Configuration loading and types.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file is a
//! valid configuration (local storage, AI analysis disabled).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detection::{service, vision};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Photo object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// AI photo analysis settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Tote database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum number of files in one upload request.
    #[serde(default = "default_max_files_per_upload")]
    pub max_files_per_upload: usize,

    /// Maximum size of a single uploaded file in bytes (default 10 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_files_per_upload: default_max_files_per_upload(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local` or `memory`.  Anything else is rejected.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Externally reachable URL under which objects are served.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            public_base_url: default_public_base_url(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Which kind of detection service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AiProvider {
    /// Local object detection model served over HTTP.
    #[default]
    DetectionService,
    /// Remote OpenAI-compatible vision chat model.
    VisionModel,
}

/// AI photo analysis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Feature flag.  When false no detection request is ever sent.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub provider: AiProvider,

    /// Base URL of the detection service or vision API.  Unset means the
    /// provider's own default, see [`AiConfig::base_url`].
    #[serde(default)]
    pub service_url: Option<String>,

    /// Bearer credential for the vision API.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name for the vision API.
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Send multi-photo analysis as one request when the backend supports it.
    #[serde(default)]
    pub batch_requests: bool,

    #[serde(default = "default_single_timeout")]
    pub single_timeout_secs: u64,

    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_health_timeout")]
    pub health_check_timeout_secs: u64,
}

impl AiConfig {
    /// `service_url` if set, otherwise the default endpoint of `provider`.
    pub fn base_url(&self) -> &str {
        match (&self.service_url, self.provider) {
            (Some(url), _) => url.as_str(),
            (None, AiProvider::DetectionService) => service::DEFAULT_BASE_URL,
            (None, AiProvider::VisionModel) => vision::DEFAULT_BASE_URL,
        }
    }

    pub fn single_timeout(&self) -> Duration {
        Duration::from_secs(self.single_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: AiProvider::default(),
            service_url: None,
            api_key: None,
            model: default_ai_model(),
            batch_requests: false,
            single_timeout_secs: default_single_timeout(),
            batch_timeout_secs: default_batch_timeout(),
            health_check_interval_secs: default_health_interval(),
            health_check_timeout_secs: default_health_timeout(),
        }
    }
}

/// Tote database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_files_per_upload() -> usize {
    10
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3001/uploads".to_string()
}

fn default_storage_root() -> String {
    "./uploads".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_single_timeout() -> u64 {
    30
}

fn default_batch_timeout() -> u64 {
    60
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_database_path() -> String {
    "./data/totes.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  Empty text yields all defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}
