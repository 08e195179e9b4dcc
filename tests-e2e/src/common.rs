//! E2E test helpers and common utilities

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use proxy_harness_lib::config::{KeystoreConfig, SessionConfig, TimeoutConfig};
use proxy_harness_lib::tls::build_connector;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Default timeout for a single request in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Session configuration for end-to-end runs, keystore kept under `dir`
pub fn session_config(dir: &Path) -> SessionConfig {
    SessionConfig {
        keystore: KeystoreConfig { path: dir.join("keystore.toml"), ..KeystoreConfig::default() },
        timeout: TimeoutConfig {
            settle_ms: 3_000,
            probe_interval_ms: 5,
            ..TimeoutConfig::default()
        },
        ..SessionConfig::default()
    }
}

/// Plain HTTP client that never goes through an environment proxy
pub fn http_client() -> TestResult<Client> {
    Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}").into())
}

/// HTTPS client for self-signed listeners
pub fn https_client() -> TestResult<Client> {
    Client::builder()
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| format!("Failed to create HTTPS client: {e}").into())
}

/// Completes a TLS handshake with `addr`, trusting only `trusted_pem`
pub async fn verify_tls_identity(addr: SocketAddr, trusted_pem: &str) -> TestResult<()> {
    let connector = build_connector(trusted_pem)?;
    let stream = TcpStream::connect(addr).await?;
    connector.connect(ServerName::try_from("localhost")?, stream).await?;
    Ok(())
}

/// GETs `url` and returns the status with the body parsed as JSON
pub async fn get_json(client: &Client, url: &str) -> TestResult<(reqwest::StatusCode, serde_json::Value)> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Failed to send request to {url}: {e}"))?;
    let status = response.status();
    let body = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse response from {url} as JSON: {e}"))?;
    Ok((status, body))
}
