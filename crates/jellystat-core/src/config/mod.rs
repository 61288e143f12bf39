//! Configuration loading and validation.
//!
//! Config location: `~/.jellystat/jellystat.json` (JSON5). Every field has a
//! default, so a missing file is not an error. A handful of environment
//! variables override the file, see [`Config::with_env_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the bearer token signing secret.
pub const JWT_SECRET_VAR: &str = "JWT_SECRET";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The signing secret is absent or empty.
    #[error("JWT Secret cannot be undefined")]
    MissingSecret,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing store configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Front-end bundle configuration.
    #[serde(default)]
    pub ui: UiConfig,

    /// Credential presentation settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Startup pipeline behaviour.
    #[serde(default)]
    pub startup: StartupConfig,

    /// Periodic job cadence.
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("jellystat.json")
    }

    /// Get the Jellystat state directory.
    ///
    /// Uses `JELLYSTAT_STATE_DIR` env var if set, otherwise `~/.jellystat`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("JELLYSTAT_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".jellystat")
        } else {
            PathBuf::from(".jellystat")
        }
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if an override has an invalid value.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Recognised keys: `PORT`, `LISTEN_IP`, `JELLYSTAT_DATA_DIR`,
    /// `JELLYSTAT_DIST_DIR` and `JELLYSTAT_STARTUP_ON_FAILURE`.
    ///
    /// # Errors
    ///
    /// Returns error if an override has an invalid value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::Validation(format!("Invalid PORT '{port}': {e}")))?;
        }
        if let Some(ip) = lookup("LISTEN_IP") {
            self.server.bind_address = ip;
        }
        if let Some(dir) = lookup("JELLYSTAT_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("JELLYSTAT_DIST_DIR") {
            self.ui.dist_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("JELLYSTAT_STARTUP_ON_FAILURE") {
            self.startup.on_failure = policy.parse()?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Directory holding the sled database.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    /// Directory the backup job writes to.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.storage
            .backup_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("backups"))
    }

    /// Listener address as `ip:port`.
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Validate the configuration.
    ///
    /// Runs on load and after environment overrides; callers that change
    /// fields afterwards must run it again.
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.auth.api_key_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "API key header name cannot be empty".to_string(),
            ));
        }

        if self.tasks.activity_interval_ms == 0
            || self.tasks.sync_interval_secs == 0
            || self.tasks.backup_interval_secs == 0
        {
            return Err(ConfigError::Validation(
                "Task intervals must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Enable CORS.
    #[serde(default = "default_true")]
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            cors: true,
        }
    }
}

const fn default_port() -> u16 {
    3003
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_true() -> bool {
    true
}

/// Backing store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Database directory. Defaults to `<state_dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory backups are written to. Defaults to `<state_dir>/backups`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

/// Front-end bundle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    /// Directory containing the built client and its `index.html`.
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            dist_dir: default_dist_dir(),
        }
    }
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

/// Where API keys may be presented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Header carrying an API key.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Query parameter carrying an API key when the header is absent.
    #[serde(default = "default_api_key_query_param")]
    pub api_key_query_param: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            api_key_query_param: default_api_key_query_param(),
        }
    }
}

fn default_api_key_header() -> String {
    "x-api-token".to_string()
}

fn default_api_key_query_param() -> String {
    "apiKey".to_string()
}

/// Startup pipeline behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupConfig {
    /// What a failed pipeline stage does to the process.
    #[serde(default)]
    pub on_failure: StartupPolicy,
}

/// Reaction to a failed startup stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPolicy {
    /// Log the failure and keep the process alive without serving.
    #[default]
    #[serde(rename = "log")]
    LogAndContinue,
    /// Terminate the process with a non-zero status.
    #[serde(rename = "exit")]
    Exit,
}

impl std::str::FromStr for StartupPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" | "continue" => Ok(Self::LogAndContinue),
            "exit" | "fatal" => Ok(Self::Exit),
            _ => Err(ConfigError::Validation(format!(
                "Unknown startup failure policy: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for StartupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogAndContinue => write!(f, "log"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Periodic job cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksConfig {
    /// Activity monitor polling interval in milliseconds.
    #[serde(default = "default_activity_interval")]
    pub activity_interval_ms: u64,

    /// Sync interval in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Backup interval in seconds.
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            activity_interval_ms: default_activity_interval(),
            sync_interval_secs: default_sync_interval(),
            backup_interval_secs: default_backup_interval(),
        }
    }
}

impl TasksConfig {
    /// Activity monitor interval.
    #[must_use]
    pub const fn activity_interval(&self) -> Duration {
        Duration::from_millis(self.activity_interval_ms)
    }

    /// Sync interval.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Backup interval.
    #[must_use]
    pub const fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }
}

const fn default_activity_interval() -> u64 {
    1000
}

const fn default_sync_interval() -> u64 {
    600
}

const fn default_backup_interval() -> u64 {
    86_400
}

/// Process-wide bearer token settings.
///
/// Constructed once at startup and handed to the auth gateway by reference.
pub struct AuthSettings {
    jwt_secret: SecretString,
}

impl AuthSettings {
    /// Create settings from an explicit secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if the secret is empty.
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Self {
            jwt_secret: SecretString::from(secret),
        })
    }

    /// Read the secret from `JWT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the secret through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if the value is absent or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(JWT_SECRET_VAR)
            .ok_or(ConfigError::MissingSecret)
            .and_then(Self::new)
    }

    /// Secret bytes for signing and verification.
    #[must_use]
    pub fn secret_bytes(&self) -> &[u8] {
        self.jwt_secret.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}
