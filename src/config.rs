//! Configuration module for stowage.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Result, StowageError};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Absolute base URL used when building signed URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// CORS allowed origins (empty = permissive).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: default_public_base_url(),
            cors_origins: vec![],
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/stowage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which storage backend is active for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local disk under a sandboxed base directory.
    #[default]
    Local,
    /// Remote cloud-drive provider.
    Remote,
}

/// Local disk backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Base directory for stored bytes.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_base_path() -> String {
    "data/files".to_string()
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
        }
    }
}

/// Remote drive backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStorageConfig {
    /// Drive API endpoint, e.g. `https://drive.example.com/v1`.
    #[serde(default)]
    pub endpoint: String,
    /// Bearer token for the drive API.
    #[serde(default)]
    pub access_token: String,
    /// Whether the provider honours `Range` on content reads.
    #[serde(default)]
    pub range_reads: bool,
    /// Connect timeout in seconds.
    #[serde(default = "default_remote_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_remote_connect_timeout() -> u64 {
    10
}

impl Default for RemoteStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: String::new(),
            range_reads: false,
            connect_timeout_secs: default_remote_connect_timeout(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Active backend. Fixed for the lifetime of the process.
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory under which archive staging directories are created.
    /// Defaults to the OS temp directory.
    #[serde(default)]
    pub staging_dir: Option<String>,
    /// Local backend settings.
    #[serde(default)]
    pub local: LocalStorageConfig,
    /// Remote backend settings.
    #[serde(default)]
    pub remote: RemoteStorageConfig,
}

impl StorageConfig {
    /// Resolve the staging root directory.
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Token secrets.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 secret for session tokens issued by the identity service.
    #[serde(default)]
    pub session_secret: String,
    /// HS256 secret for signed file capabilities.
    #[serde(default)]
    pub capability_secret: String,
}

/// Web API limits.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Maximum size of a single uploaded file in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_max_upload_size() -> u64 {
    100
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

impl WebConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file; console only when unset.
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    /// Extra `EnvFilter` directives, e.g. `"sqlx=warn"`.
    #[serde(default = "default_log_directives")]
    pub directives: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<String> {
    Some("logs/stowage.log".to_string())
}

fn default_log_directives() -> Vec<String> {
    vec!["sqlx=warn".to_string()]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            directives: default_log_directives(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Token secrets.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Web API limits.
    #[serde(default)]
    pub web: WebConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StowageError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StowageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STOWAGE_SESSION_SECRET`
    /// - `STOWAGE_CAPABILITY_SECRET`
    /// - `STOWAGE_REMOTE_TOKEN`
    pub fn apply_env_overrides(&mut self) {
        let overrides = [
            ("STOWAGE_SESSION_SECRET", &mut self.auth.session_secret),
            ("STOWAGE_CAPABILITY_SECRET", &mut self.auth.capability_secret),
            ("STOWAGE_REMOTE_TOKEN", &mut self.storage.remote.access_token),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    *slot = value;
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.auth.session_secret.is_empty() {
            return Err(StowageError::Config(
                "auth.session_secret is not set. \
                 Set it in config.toml or via STOWAGE_SESSION_SECRET."
                    .to_string(),
            ));
        }
        if self.auth.capability_secret.is_empty() {
            return Err(StowageError::Config(
                "auth.capability_secret is not set. \
                 Set it in config.toml or via STOWAGE_CAPABILITY_SECRET."
                    .to_string(),
            ));
        }
        if self.auth.session_secret == self.auth.capability_secret {
            return Err(StowageError::Config(
                "auth.session_secret and auth.capability_secret must differ".to_string(),
            ));
        }
        if self.storage.backend == BackendKind::Remote && self.storage.remote.endpoint.is_empty()
        {
            return Err(StowageError::Config(
                "storage.backend is \"remote\" but storage.remote.endpoint is empty".to_string(),
            ));
        }
        url::Url::parse(&self.server.public_base_url).map_err(|e| {
            StowageError::Config(format!("server.public_base_url is not a URL: {e}"))
        })?;
        Ok(())
    }
}
