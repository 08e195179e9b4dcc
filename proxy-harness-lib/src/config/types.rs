use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::KeystoreFormat;

/// Echo upstream configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpstreamConfig {
    /// Serve the echo upstream over TLS with an in-memory identity
    /// Default: false
    #[serde(default)]
    pub tls: bool,
    /// Fixed port for the echo upstream
    /// Default: None (ephemeral port)
    #[serde(default)]
    pub port: Option<u16>,
}

/// Keystore configuration for the TLS listener
#[derive(Debug, Deserialize, Clone)]
pub struct KeystoreConfig {
    /// Keystore file path, reused across runs when present
    #[serde(default = "default_keystore_path")]
    pub path: PathBuf,
    /// Keystore password
    /// Default: "changeit"
    #[serde(default = "default_keystore_password")]
    pub password: String,
    /// Alias of the certificate entry, also used as its common name
    #[serde(default = "default_keystore_alias")]
    pub alias: String,
    /// Keystore format requested by the session
    /// Options: "ecdsa-p256", "ecdsa-p384", "ed25519"
    #[serde(default)]
    pub format: KeystoreFormat,
    /// Subject alternative names of generated certificates
    #[serde(default = "default_subject_alt_names")]
    pub subject_alt_names: Vec<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: default_keystore_path(),
            password: default_keystore_password(),
            alias: default_keystore_alias(),
            format: KeystoreFormat::default(),
            subject_alt_names: default_subject_alt_names(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Upper bound of each readiness or release probe in milliseconds
    /// Default: 500
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Initial probe interval in milliseconds, doubled after every attempt
    /// Default: 10
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Upper bound for draining host connections on shutdown, in seconds
    /// Default: 5
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
    /// Connect timeout used when forwarding to an upstream, in milliseconds
    /// Default: 5000
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// TLS handshake timeout in seconds
    /// Default: 15
    #[serde(default = "default_tls_handshake_secs")]
    pub tls_handshake_secs: u64,
    /// Request timeout of the client facade, in milliseconds
    /// Default: 5000
    #[serde(default = "default_client_request_ms")]
    pub client_request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            shutdown_secs: default_shutdown_secs(),
            connect_ms: default_connect_ms(),
            tls_handshake_secs: default_tls_handshake_secs(),
            client_request_ms: default_client_request_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn tls_handshake(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_secs)
    }

    pub fn client_request(&self) -> Duration {
        Duration::from_millis(self.client_request_ms)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Main configuration structure for one session
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Host name the client facade connects to
    /// Default: "localhost"
    #[serde(default = "default_host")]
    pub host: String,
    /// Context path the proxy endpoint is mounted under
    /// Leading and trailing slashes are ignored, empty mounts at the root
    /// Default: "proxy"
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Fixed plaintext listener port
    /// Default: None (allocated)
    #[serde(default)]
    pub http_port: Option<u16>,
    /// Fixed TLS listener port
    /// Default: None (allocated)
    #[serde(default)]
    pub https_port: Option<u16>,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            path_prefix: default_path_prefix(),
            http_port: None,
            https_port: None,
            upstream: UpstreamConfig::default(),
            keystore: KeystoreConfig::default(),
            timeout: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Context path without surrounding slashes
    pub fn normalized_prefix(&self) -> String {
        normalize_prefix(&self.path_prefix)
    }
}

/// Strips leading and trailing slashes from a context path
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_matches('/').to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_path_prefix() -> String {
    "proxy".to_string()
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from("target").join("proxy-harness").join("keystore.toml")
}

fn default_keystore_password() -> String {
    "changeit".to_string()
}

fn default_keystore_alias() -> String {
    "proxy-harness".to_string()
}

fn default_subject_alt_names() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_settle_ms() -> u64 {
    500
}

fn default_probe_interval_ms() -> u64 {
    10
}

fn default_shutdown_secs() -> u64 {
    5
}

fn default_connect_ms() -> u64 {
    5000
}

fn default_tls_handshake_secs() -> u64 {
    15
}

fn default_client_request_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}
