//! Shared helpers for harness integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use http::header::HOST;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use proxy_harness_lib::config::{KeystoreConfig, SessionConfig, TimeoutConfig};
use proxy_harness_lib::telemetry::init_test_tracing;
use proxy_harness_lib::tls::build_connector;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Timeouts short enough for tests but with room for slow CI machines
pub fn test_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        settle_ms: 3_000,
        probe_interval_ms: 5,
        shutdown_secs: 5,
        connect_ms: 2_000,
        tls_handshake_secs: 5,
        client_request_ms: 5_000,
    }
}

/// Session configuration keeping its keystore under `dir`
pub fn test_config(dir: &Path) -> SessionConfig {
    init_test_tracing();
    SessionConfig {
        keystore: KeystoreConfig { path: dir.join("keystore.toml"), ..KeystoreConfig::default() },
        timeout: test_timeouts(),
        ..SessionConfig::default()
    }
}

/// Sends `req` over a fresh plaintext HTTP/1.1 connection, keeping its URI form and headers as given
pub async fn send_plain(addr: SocketAddr, req: Request<Full<Bytes>>) -> TestResult<(StatusCode, String)> {
    let stream = TcpStream::connect(addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    let resp = sender.send_request(req).await?;
    let status = resp.status();
    let body = resp.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}

/// GET over TLS, trusting only `trusted_pem`
pub async fn https_get(
    addr: SocketAddr,
    trusted_pem: &str,
    path: &str,
) -> TestResult<(StatusCode, String)> {
    let connector = build_connector(trusted_pem)?;
    let stream = TcpStream::connect(addr).await?;
    let tls = connector.connect(ServerName::try_from("localhost")?, stream).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = Request::builder()
        .method("GET")
        .uri(path)
        .header(HOST, format!("localhost:{}", addr.port()))
        .body(Full::new(Bytes::new()))?;
    let resp = sender.send_request(req).await?;
    let status = resp.status();
    let body = resp.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8(body.to_vec())?))
}

/// Plain GET request with the Host header pointing at `addr`
pub fn get_request(addr: SocketAddr, path: &str) -> TestResult<Request<Full<Bytes>>> {
    Ok(Request::builder()
        .method("GET")
        .uri(path)
        .header(HOST, addr.to_string())
        .body(Full::new(Bytes::new()))?)
}
