//! Adapter configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ARI_CONFIG)
//! 3. Environment variables

use ari_protocol::DEFAULT_KEEPALIVE_MS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client identification sent in the credentials handshake.
pub const DEFAULT_SDK_NAME: &str = "Rust Adapter SDK";

/// Which provider a connection is attached for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Data,
    Metadata,
}

/// Adapter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy endpoint configuration.
    pub proxy: ProxyConfig,
    /// Credentials sent to the proxy.
    pub credentials: CredentialsConfig,
    /// Keepalive configuration.
    pub keepalive: KeepaliveConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ARI_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.proxy.apply_env_overrides();
        self.credentials.apply_env_overrides();
        self.keepalive.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Checks that a provider of the given kind can be attached.
    pub fn validate(&self, kind: ProviderKind) -> Result<(), ConfigError> {
        if self.proxy.port_for(kind).is_none() {
            let which = match kind {
                ProviderKind::Data => "data_port",
                ProviderKind::Metadata => "metadata_port",
            };
            return Err(ConfigError::ValidationError(format!(
                "proxy.{} not set",
                which
            )));
        }
        self.tls.validate(&self.proxy.host)
    }

    /// Session-level settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            user: self.credentials.user.clone(),
            password: self.credentials.password.clone(),
            sdk_name: self.credentials.sdk_name.clone(),
            keepalive_ms: self.keepalive.interval_ms,
        }
    }
}

/// Proxy endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Port of the metadata provider endpoint.
    pub metadata_port: Option<u16>,
    /// Port of the data provider request/reply endpoint.
    pub data_port: Option<u16>,
    /// Port of the legacy data notify endpoint; makes the data session dual-stream.
    pub notify_port: Option<u16>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            metadata_port: None,
            data_port: None,
            notify_port: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ProxyConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ARI_PROXY_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("ARI_METADATA_PORT") {
            if let Ok(p) = port.parse() {
                self.metadata_port = Some(p);
            }
        }

        if let Ok(port) = std::env::var("ARI_DATA_PORT") {
            if let Ok(p) = port.parse() {
                self.data_port = Some(p);
            }
        }

        if let Ok(port) = std::env::var("ARI_NOTIFY_PORT") {
            if let Ok(p) = port.parse() {
                self.notify_port = Some(p);
            }
        }

        if let Ok(timeout) = std::env::var("ARI_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }
    }

    pub fn port_for(&self, kind: ProviderKind) -> Option<u16> {
        match kind {
            ProviderKind::Data => self.data_port,
            ProviderKind::Metadata => self.metadata_port,
        }
    }

    /// Returns connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Credentials sent in the handshake frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Client identification.
    pub sdk_name: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            sdk_name: DEFAULT_SDK_NAME.to_string(),
        }
    }
}

impl CredentialsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("ARI_USER") {
            self.user = Some(user);
        }
        if let Ok(password) = std::env::var("ARI_PASSWORD") {
            self.password = Some(password);
        }
    }
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Local keepalive interval in milliseconds; zero or negative means no
    /// local preference.
    pub interval_ms: i64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_KEEPALIVE_MS,
        }
    }
}

impl KeepaliveConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("ARI_KEEPALIVE_MS") {
            if let Ok(ms) = interval.parse() {
                self.interval_ms = ms;
            }
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS to the proxy.
    #[serde(default)]
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s); webpki roots are used when unset.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the proxy host).
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("ARI_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("ARI_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("ARI_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS configuration against the proxy host.
    pub fn validate(&self, host: &str) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        let name = self.server_name.as_deref().unwrap_or(host);
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "TLS enabled but neither server_name nor proxy host set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings consumed by a provider session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub sdk_name: String,
    /// Local keepalive interval in milliseconds.
    pub keepalive_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            sdk_name: DEFAULT_SDK_NAME.to_string(),
            keepalive_ms: DEFAULT_KEEPALIVE_MS,
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
