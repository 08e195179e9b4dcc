use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::StatusCode;
use hyper::body::Incoming;
use hyper::{Request, Response};
use proxy_harness_lib::host::{
    synthetic_response, Endpoint, HostInfo, HostServer, HostState, RequestContext, RespBody,
    Scheme, StartupListener,
};
use proxy_harness_lib::readiness::{wait_until_released, ProbePolicy};
use proxy_harness_lib::{HarnessError, KeystoreFormat, TlsIdentity};
use tokio::net::TcpStream;

mod helpers;
use helpers::{get_request, https_get, send_plain, TestResult};

/// Answers with "<context_path>|<path_within>"
struct PathEndpoint;

#[async_trait]
impl Endpoint for PathEndpoint {
    async fn handle(&self, _req: Request<Incoming>, ctx: RequestContext) -> Response<RespBody> {
        synthetic_response(
            StatusCode::OK,
            "text/plain",
            format!("{}|{}|{}", ctx.context_path, ctx.path_within, ctx.scheme),
        )
    }
}

#[derive(Default)]
struct CapturePorts {
    seen: Mutex<Vec<u16>>,
}

impl StartupListener for CapturePorts {
    fn on_startup(&self, host: &HostInfo) -> proxy_harness_lib::Result<()> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.extend(host.ports());
        }
        Ok(())
    }
}

struct FailingListener;

impl StartupListener for FailingListener {
    fn on_startup(&self, _host: &HostInfo) -> proxy_harness_lib::Result<()> {
        Err(HarnessError::Startup("not today".to_string()))
    }
}

fn plain_addr(host: &HostServer) -> TestResult<SocketAddr> {
    host.info()
        .and_then(|i| i.listeners.iter().find(|l| l.scheme == Scheme::Http))
        .map(|l| l.addr)
        .ok_or_else(|| "no plaintext listener".into())
}

fn probe() -> ProbePolicy {
    ProbePolicy::new(Duration::from_secs(3), Duration::from_millis(5))
}

#[tokio::test]
async fn endpoint_only_sees_paths_under_its_prefix() -> TestResult<()> {
    let mut host = HostServer::new();
    host.set_port(0).add_endpoint("/proxy/", Arc::new(PathEndpoint));
    host.start().await?;
    let addr = plain_addr(&host)?;

    let (status, body) = send_plain(addr, get_request(addr, "/proxy")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "/proxy|/|http");

    let (status, body) = send_plain(addr, get_request(addr, "/proxy/echo/1?x=2")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "/proxy|/echo/1|http");

    let (status, _) = send_plain(addr, get_request(addr, "/proxying")?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_plain(addr, get_request(addr, "/")?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    host.stop();
    host.await_termination(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn longest_prefix_wins() -> TestResult<()> {
    let mut host = HostServer::new();
    host.set_port(0)
        .add_endpoint("", Arc::new(PathEndpoint))
        .add_endpoint("api/v1", Arc::new(PathEndpoint));
    host.start().await?;
    let addr = plain_addr(&host)?;

    let (_, body) = send_plain(addr, get_request(addr, "/api/v1/users")?).await?;
    assert_eq!(body, "/api/v1|/users|http");
    let (_, body) = send_plain(addr, get_request(addr, "/api/v2")?).await?;
    assert_eq!(body, "|/api/v2|http");

    host.stop();
    Ok(())
}

#[tokio::test]
async fn serves_tls_with_the_given_identity() -> TestResult<()> {
    let identity = TlsIdentity::ephemeral(
        "host-test",
        KeystoreFormat::EcdsaP256,
        &["localhost".to_string(), "127.0.0.1".to_string()],
    )?;
    let capture = Arc::new(CapturePorts::default());

    let mut host = HostServer::new();
    host.set_port(0)
        .add_secure_connector(0, identity.clone())
        .add_endpoint("proxy", Arc::new(PathEndpoint))
        .add_startup_listener(capture.clone());
    host.start().await?;

    let info = host.info().cloned().ok_or("host not started")?;
    let https = info.listeners.iter().find(|l| l.scheme == Scheme::Https).ok_or("no tls listener")?;
    let seen = capture.seen.lock().map(|s| s.clone()).unwrap_or_default();
    assert_eq!(seen, info.ports());
    assert_eq!(host.local_ports().len(), 2);
    assert!(info.serves_port(https.addr.port()));
    assert!(info.redirect_port.is_none());

    let (status, body) = https_get(https.addr, &identity.certificate_pem, "/proxy/secure").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "/proxy|/secure|https");

    host.stop();
    host.await_termination(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn stop_releases_every_port() -> TestResult<()> {
    let identity = TlsIdentity::ephemeral("host-test", KeystoreFormat::Ed25519, &["localhost".to_string()])?;
    let mut host = HostServer::new();
    host.set_port(0).add_secure_connector(0, identity).add_endpoint("", Arc::new(PathEndpoint));
    host.start().await?;
    assert!(host.is_running());

    let addrs: Vec<SocketAddr> = host.info().map(|i| i.listeners.iter().map(|l| l.addr).collect()).unwrap_or_default();
    assert!(matches!(
        host.await_termination(Duration::from_millis(50)).await,
        Err(HarnessError::InvalidState { .. })
    ));

    host.stop();
    host.stop();
    assert_eq!(host.state(), HostState::Stopped);
    host.await_termination(Duration::from_secs(5)).await?;
    for addr in addrs {
        wait_until_released(addr, probe()).await?;
    }
    Ok(())
}

#[tokio::test]
async fn failing_startup_listener_aborts_start() -> TestResult<()> {
    let mut host = HostServer::new();
    host.set_port(0)
        .add_endpoint("", Arc::new(PathEndpoint))
        .add_startup_listener(Arc::new(FailingListener));
    let result = host.start().await;
    assert!(matches!(result, Err(HarnessError::Startup(_))));
    assert!(!host.is_running());
    assert!(host.local_ports().is_empty());
    Ok(())
}

#[tokio::test]
async fn bind_conflict_is_a_startup_error() -> TestResult<()> {
    let occupied = StdTcpListener::bind("127.0.0.1:0")?;
    let port = occupied.local_addr()?.port();

    let mut host = HostServer::new();
    host.set_port(port).add_endpoint("", Arc::new(PathEndpoint));
    assert!(matches!(host.start().await, Err(HarnessError::Startup(_))));
    assert_eq!(host.state(), HostState::Configured);

    // never started: terminating is immediate
    host.await_termination(Duration::from_millis(10)).await?;
    Ok(())
}

#[tokio::test]
async fn host_without_connectors_refuses_to_start() {
    let mut host = HostServer::new();
    assert!(matches!(host.start().await, Err(HarnessError::Startup(_))));
}

#[tokio::test]
async fn plaintext_connector_reports_its_redirect_port() -> TestResult<()> {
    let identity = TlsIdentity::ephemeral("host-test", KeystoreFormat::EcdsaP256, &["localhost".to_string()])?;
    let mut host = HostServer::new();
    host.set_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .set_port(0)
        .set_redirect_port(8443)
        .add_secure_connector(0, identity)
        .add_endpoint("", Arc::new(PathEndpoint));
    host.start().await?;

    let info = host.info().cloned().ok_or("host not started")?;
    assert_eq!(info.redirect_port, Some(8443));
    assert!(info.listeners.iter().all(|l| l.addr.ip().is_loopback()));
    assert!(!info.serves_port(0));

    host.stop();
    host.await_termination(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn stalled_tls_handshake_does_not_delay_termination() -> TestResult<()> {
    let identity = TlsIdentity::ephemeral("host-test", KeystoreFormat::EcdsaP256, &["localhost".to_string()])?;
    let mut host = HostServer::new();
    host.add_secure_connector(0, identity)
        .set_tls_handshake_timeout(Duration::from_secs(60))
        .add_endpoint("", Arc::new(PathEndpoint));
    host.start().await?;
    let https = host.info().and_then(|i| i.listeners.first().copied()).ok_or("no tls listener")?;

    // connected but silent, the handshake never progresses
    let _idle = TcpStream::connect(https.addr).await?;
    let deadline = Instant::now() + Duration::from_secs(3);
    while host.active_connections() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(host.active_connections(), 1);

    let started = Instant::now();
    host.stop();
    host.await_termination(Duration::from_secs(5)).await?;
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(host.active_connections(), 0);
    Ok(())
}
