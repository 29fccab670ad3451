//! # Issuer Configuration
//!
//! Configuration management for the issuance engine and the API binary.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     NFE_DATABASE_PATH=/var/lib/nfe/issuer.db                           │
//! │     NFE_CANCELLATION_WINDOW_HOURS=24                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     explicit --config path, or                                         │
//! │     ~/.config/issuer/issuer.toml (Linux)                               │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     30s submission timeout, 24h cancellation window                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # issuer.toml
//! [authority]
//! submit_timeout_secs = 30
//! poll_interval_ms = 2000
//! max_poll_attempts = 5
//! max_retries = 3
//!
//! [[authority.overrides]]
//! state = "SP"
//! environment = "homologation"
//! base_url = "https://sefaz-proxy.internal/sp"
//!
//! [storage]
//! artifact_root = "/var/lib/nfe/artifacts"
//! certificate_root = "/var/lib/nfe/certificates"
//!
//! [database]
//! path = "/var/lib/nfe/issuer.db"
//!
//! [events]
//! cancellation_window_hours = 24
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{IssueError, IssueResult};
use nfe_core::validation::state_code_for;
use nfe_core::{DocumentModel, Environment};

// =============================================================================
// Authority Settings
// =============================================================================

/// Replaces the built-in authorizer URLs for one state and environment.
///
/// Service paths are appended as `{base_url}/{ServiceName}`, for example
/// `{base_url}/NFeAutorizacao4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverride {
    /// State abbreviation (`SP`, `BA`, ...).
    pub state: String,

    pub environment: Environment,

    /// Restricts the override to one model. Both models when absent.
    #[serde(default)]
    pub model: Option<DocumentModel>,

    pub base_url: String,

    /// NFC-e consultation portal used in the QR code.
    #[serde(default)]
    pub qr_code_url: Option<String>,

    /// NFC-e "consult by key" portal printed on the DANFE.
    #[serde(default)]
    pub consult_url: Option<String>,
}

/// SEFAZ communication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySettings {
    /// Request timeout for every SOAP call (seconds).
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// TCP/TLS connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Fixed wait between receipt polls (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Polls before giving up with an unknown outcome.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Retries of a single call after a transport failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between transport retries (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between transport retries (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default)]
    pub overrides: Vec<EndpointOverride>,
}

fn default_submit_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_poll_attempts() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    5
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        AuthoritySettings {
            submit_timeout_secs: default_submit_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            overrides: Vec::new(),
        }
    }
}

impl AuthoritySettings {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where artifacts and certificates live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    #[serde(default = "default_certificate_root")]
    pub certificate_root: PathBuf,
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("br", "nfe", "issuer")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_artifact_root() -> PathBuf {
    data_dir().join("artifacts")
}

fn default_certificate_root() -> PathBuf {
    data_dir().join("certificates")
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            artifact_root: default_artifact_root(),
            certificate_root: default_certificate_root(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    data_dir().join("issuer.db")
}

fn default_max_connections() -> u32 {
    8
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Event Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Hours after authorization during which cancellation is accepted.
    #[serde(default = "default_cancellation_window")]
    pub cancellation_window_hours: i64,
}

fn default_cancellation_window() -> i64 {
    24
}

impl Default for EventSettings {
    fn default() -> Self {
        EventSettings {
            cancellation_window_hours: default_cancellation_window(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Issuer Configuration
// =============================================================================

/// Complete issuer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerConfig {
    #[serde(default)]
    pub authority: AuthoritySettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl IssuerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (issuer.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> IssueResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading issuer config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(IssueError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides_from(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> IssueResult<()> {
        let authority = &self.authority;
        if authority.submit_timeout_secs == 0 {
            return Err(IssueError::Config(
                "authority.submit_timeout_secs must be greater than 0".into(),
            ));
        }
        if authority.max_poll_attempts == 0 {
            return Err(IssueError::Config(
                "authority.max_poll_attempts must be greater than 0".into(),
            ));
        }

        for entry in &authority.overrides {
            if state_code_for(&entry.state).is_none() {
                return Err(IssueError::Config(format!(
                    "unknown state '{}' in authority.overrides",
                    entry.state
                )));
            }
            for raw in std::iter::once(&entry.base_url)
                .chain(entry.qr_code_url.iter())
                .chain(entry.consult_url.iter())
            {
                let parsed = url::Url::parse(raw)?;
                if parsed.scheme() != "https" && parsed.scheme() != "http" {
                    return Err(IssueError::Config(format!(
                        "override URL must be http(s), got: {}",
                        raw
                    )));
                }
            }
        }

        if self.events.cancellation_window_hours <= 0 {
            return Err(IssueError::Config(
                "events.cancellation_window_hours must be greater than 0".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(IssueError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `NFE_*` overrides read through `lookup`.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("NFE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("NFE_DATABASE_MAX_CONNECTIONS") {
            match value.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_DATABASE_MAX_CONNECTIONS"),
            }
        }
        if let Some(path) = lookup("NFE_ARTIFACT_ROOT") {
            self.storage.artifact_root = PathBuf::from(path);
        }
        if let Some(path) = lookup("NFE_CERTIFICATE_ROOT") {
            self.storage.certificate_root = PathBuf::from(path);
        }
        if let Some(value) = lookup("NFE_SUBMIT_TIMEOUT_SECS") {
            match value.parse() {
                Ok(n) => self.authority.submit_timeout_secs = n,
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_SUBMIT_TIMEOUT_SECS"),
            }
        }
        if let Some(value) = lookup("NFE_POLL_INTERVAL_MS") {
            match value.parse() {
                Ok(n) => self.authority.poll_interval_ms = n,
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_POLL_INTERVAL_MS"),
            }
        }
        if let Some(value) = lookup("NFE_MAX_POLL_ATTEMPTS") {
            match value.parse() {
                Ok(n) => self.authority.max_poll_attempts = n,
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_MAX_POLL_ATTEMPTS"),
            }
        }
        if let Some(value) = lookup("NFE_CANCELLATION_WINDOW_HOURS") {
            match value.parse() {
                Ok(n) => self.events.cancellation_window_hours = n,
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_CANCELLATION_WINDOW_HOURS"),
            }
        }
        if let Some(addr) = lookup("NFE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(value) = lookup("NFE_PORT") {
            match value.parse() {
                Ok(port) => {
                    debug!(port, "Overriding server port from environment");
                    self.server.port = port;
                }
                Err(_) => warn!(value = %value, "Ignoring invalid NFE_PORT"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("br", "nfe", "issuer")
            .map(|dirs| dirs.config_dir().join("issuer.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = IssuerConfig::default();
        assert_eq!(config.authority.submit_timeout_secs, 30);
        assert_eq!(config.events.cancellation_window_hours, 24);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let config: IssuerConfig = toml::from_str(
            r#"
            [authority]
            max_poll_attempts = 3

            [[authority.overrides]]
            state = "SP"
            environment = "homologation"
            model = "nfce"
            base_url = "http://127.0.0.1:9000"

            [events]
            cancellation_window_hours = 168
            "#,
        )
        .unwrap();

        assert_eq!(config.authority.max_poll_attempts, 3);
        assert_eq!(config.authority.poll_interval_ms, 2000);
        assert_eq!(config.authority.overrides.len(), 1);
        assert_eq!(config.authority.overrides[0].model, Some(DocumentModel::Nfce));
        assert_eq!(config.events.cancellation_window_hours, 168);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NFE_DATABASE_PATH", "/tmp/issuer.db"),
            ("NFE_CANCELLATION_WINDOW_HOURS", "48"),
            ("NFE_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = IssuerConfig::default();
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/issuer.db"));
        assert_eq!(config.events.cancellation_window_hours, 48);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_validation_rejects_bad_overrides() {
        let mut config = IssuerConfig::default();
        config.authority.overrides.push(EndpointOverride {
            state: "XX".into(),
            environment: Environment::Production,
            model: None,
            base_url: "https://example.com".into(),
            qr_code_url: None,
            consult_url: None,
        });
        assert!(matches!(config.validate(), Err(IssueError::Config(_))));

        config.authority.overrides[0].state = "SP".into();
        config.authority.overrides[0].base_url = "ftp://example.com".into();
        assert!(matches!(config.validate(), Err(IssueError::Config(_))));

        config.authority.overrides[0].base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_window() {
        let mut config = IssuerConfig::default();
        config.events.cancellation_window_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = IssuerConfig::load(Some(dir.path().join("absent.toml")));
        assert!(matches!(result, Err(IssueError::Config(_))));
    }
}
