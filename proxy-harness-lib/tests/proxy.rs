use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::{Request, StatusCode};
use http_body_util::Full;
use proxy_harness_lib::host::{HostServer, Scheme};
use proxy_harness_lib::proxy::{DefaultUpstream, ProxyEndpoint, StatusReport};
use proxy_harness_lib::upstream::{EchoReply, UpstreamOptions, UpstreamServer};
use proxy_harness_lib::ProxyClient;

mod helpers;
use helpers::{get_request, send_plain, test_timeouts, TestResult};

struct Fixture {
    upstream: UpstreamServer,
    host: HostServer,
    proxy: Arc<ProxyEndpoint>,
    addr: SocketAddr,
}

impl Fixture {
    async fn start(default_upstream: bool, initialize: bool) -> TestResult<Self> {
        let upstream = UpstreamServer::start(UpstreamOptions {
            timeouts: test_timeouts(),
            ..UpstreamOptions::default()
        })
        .await?;
        let default = default_upstream.then(|| DefaultUpstream::plain(upstream.addr()));
        let proxy = Arc::new(ProxyEndpoint::new(default, Duration::from_secs(2)));

        let mut host = HostServer::new();
        host.set_port(0).add_endpoint("proxy", proxy.clone());
        if initialize {
            host.add_startup_listener(proxy.clone());
        }
        host.start().await?;
        let addr = host
            .info()
            .and_then(|i| i.listeners.iter().find(|l| l.scheme == Scheme::Http))
            .map(|l| l.addr)
            .ok_or("no plaintext listener")?;
        Ok(Self { upstream, host, proxy, addr })
    }

    fn client(&self) -> TestResult<ProxyClient> {
        Ok(ProxyClient::new("127.0.0.1", self.addr.port(), "proxy", Duration::from_secs(5))?)
    }

    async fn shutdown(mut self) -> TestResult<()> {
        self.upstream.stop().await?;
        self.host.stop();
        self.host.await_termination(Duration::from_secs(5)).await?;
        Ok(())
    }
}

#[tokio::test]
async fn forwards_to_default_upstream_and_records() -> TestResult<()> {
    let fx = Fixture::start(true, true).await?;
    let client = fx.client()?;

    let resp = client
        .request(reqwest::Method::POST, "/echo/1?name=value")?
        .body("hello")
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let reply: EchoReply = resp.json().await?;
    assert_eq!(reply.method, "POST");
    assert_eq!(reply.path, "/echo/1");
    assert_eq!(reply.query.as_deref(), Some("name=value"));
    assert_eq!(reply.body, "hello");

    let requests = client.retrieve_recorded_requests().await?;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/echo/1");
    assert_eq!(requests[0].body, "hello");
    assert!(!requests[0].secure);

    let expectations = client.retrieve_recorded_expectations().await?;
    assert_eq!(expectations.len(), 1);
    assert_eq!(expectations[0].response.status, 200);
    assert!(expectations[0].response.body.contains("\"/echo/1\""));

    fx.shutdown().await
}

#[tokio::test]
async fn reset_clears_accumulated_state() -> TestResult<()> {
    let fx = Fixture::start(true, true).await?;
    let client = fx.client()?;

    for i in 0..3 {
        let resp = client.request(reqwest::Method::GET, &format!("/case/{i}"))?.send().await?;
        assert!(resp.status().is_success());
    }
    assert_eq!(client.retrieve_recorded_requests().await?.len(), 3);
    assert_eq!(fx.proxy.recorded_requests().len(), 3);

    client.reset().await?;
    assert!(client.retrieve_recorded_requests().await?.is_empty());
    assert!(client.retrieve_recorded_expectations().await?.is_empty());

    let status: StatusReport = client.status().await?;
    assert_eq!(status.recorded_requests, 0);
    assert_eq!(status.http_port, Some(fx.addr.port()));
    assert_eq!(status.https_port, None);
    assert_eq!(status.redirect_port, None);

    fx.shutdown().await
}

#[tokio::test]
async fn control_api_requires_put() -> TestResult<()> {
    let fx = Fixture::start(true, true).await?;
    let (status, _) = send_plain(fx.addr, get_request(fx.addr, "/proxy/_control/reset")?).await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let req = Request::builder()
        .method("PUT")
        .uri("/proxy/_control/retrieve?type=everything")
        .header(HOST, fx.addr.to_string())
        .body(Full::new(Bytes::new()))?;
    let (status, _) = send_plain(fx.addr, req).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    fx.shutdown().await
}

#[tokio::test]
async fn uninitialized_endpoint_is_unavailable() -> TestResult<()> {
    let fx = Fixture::start(true, false).await?;
    assert!(!fx.proxy.is_initialized());
    let (status, _) = send_plain(fx.addr, get_request(fx.addr, "/proxy/echo")?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(fx.proxy.recorded_requests().is_empty());
    fx.shutdown().await
}

#[tokio::test]
async fn missing_upstream_is_unavailable() -> TestResult<()> {
    let fx = Fixture::start(false, true).await?;
    let (status, _) = send_plain(fx.addr, get_request(fx.addr, "/proxy/echo")?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    fx.shutdown().await
}

#[tokio::test]
async fn explicit_targets_bypass_the_default_upstream() -> TestResult<()> {
    // no default upstream: only an explicit target can succeed
    let fx = Fixture::start(false, true).await?;
    let upstream = fx.upstream.addr();

    let by_host = Request::builder()
        .method("GET")
        .uri("/proxy/by-host")
        .header(HOST, upstream.to_string())
        .body(Full::new(Bytes::new()))?;
    let (status, body) = send_plain(fx.addr, by_host).await?;
    assert_eq!(status, StatusCode::OK);
    let reply: EchoReply = serde_json::from_str(&body)?;
    assert_eq!(reply.path, "/by-host");

    let absolute = Request::builder()
        .method("GET")
        .uri(format!("http://{upstream}/proxy/absolute?q=1"))
        .header(HOST, upstream.to_string())
        .body(Full::new(Bytes::new()))?;
    let (status, body) = send_plain(fx.addr, absolute).await?;
    assert_eq!(status, StatusCode::OK);
    let reply: EchoReply = serde_json::from_str(&body)?;
    assert_eq!(reply.path, "/absolute");
    assert_eq!(reply.query.as_deref(), Some("q=1"));

    fx.shutdown().await
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() -> TestResult<()> {
    let closed = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let fx = Fixture::start(false, true).await?;
    let req = Request::builder()
        .method("GET")
        .uri("/proxy/nowhere")
        .header(HOST, closed.to_string())
        .body(Full::new(Bytes::new()))?;
    let (status, _) = send_plain(fx.addr, req).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // the failed exchange is still recorded as a request, not as an expectation
    assert_eq!(fx.proxy.recorded_requests().len(), 1);
    assert!(fx.proxy.recorded_expectations().is_empty());
    fx.shutdown().await
}
