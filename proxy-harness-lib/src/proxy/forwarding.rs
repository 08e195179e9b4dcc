use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use http::uri::Authority;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::Result;
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::tls::build_connector;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Server name presented to a TLS default upstream
const UPSTREAM_SERVER_NAME: &str = "localhost";

/// Headers that only describe a single connection and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Upstream used when a request does not name another one
#[derive(Clone)]
pub struct DefaultUpstream {
    addr: SocketAddr,
    tls: Option<TlsConnector>,
}

impl DefaultUpstream {
    pub fn plain(addr: SocketAddr) -> Self {
        Self { addr, tls: None }
    }

    /// TLS upstream whose certificate chains to `trusted_pem`
    pub fn tls(addr: SocketAddr, trusted_pem: &str) -> Result<Self> {
        Ok(Self { addr, tls: Some(build_connector(trusted_pem)?) })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl std::fmt::Debug for DefaultUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultUpstream")
            .field("addr", &self.addr)
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// Upstream response, fully buffered so it can be recorded
#[derive(Debug)]
pub(crate) struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Picks the authority a request is forwarded to.
///
/// An absolute request URI wins, then the `Host` header. `None` means the
/// request addresses the proxy itself and goes to the default upstream.
pub(crate) fn resolve_target(
    uri: &Uri,
    headers: &HeaderMap,
    own_ports: &[u16],
) -> HttpResult<Option<Authority>> {
    if let Some(authority) = uri.authority() {
        let scheme = uri.scheme_str().unwrap_or("http");
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(HttpError::UnsupportedScheme(scheme.to_string()));
        }
        if addresses_self(authority, own_ports) {
            return Ok(None);
        }
        return Ok(Some(authority.clone()));
    }

    let Some(host) = headers.get(HOST) else {
        return Ok(None);
    };
    let authority = host
        .to_str()
        .ok()
        .and_then(|h| h.parse::<Authority>().ok())
        .ok_or(HttpError::InvalidHostInRequestHeader)?;
    if addresses_self(&authority, own_ports) {
        Ok(None)
    } else {
        Ok(Some(authority))
    }
}

fn addresses_self(authority: &Authority, own_ports: &[u16]) -> bool {
    let port = authority.port_u16().unwrap_or(80);
    own_ports.contains(&port) && is_local_host(authority.host())
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| ip.is_loopback() || ip.is_unspecified())
        .unwrap_or(false)
}

/// Copies end-to-end headers, dropping hop-by-hop ones and anything the
/// `Connection` header lists
pub(crate) fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || listed.iter().any(|l| l == lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Sends requests to upstreams on behalf of the proxy endpoint
pub(crate) struct Forwarder {
    client: HttpClient,
    connect_timeout: Duration,
    default_upstream: Option<DefaultUpstream>,
}

impl Forwarder {
    pub fn new(default_upstream: Option<DefaultUpstream>, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, connect_timeout, default_upstream }
    }

    pub fn default_upstream(&self) -> Option<&DefaultUpstream> {
        self.default_upstream.as_ref()
    }

    /// Forwards `parts` and `body` to `target`, or to the default upstream when `None`
    pub async fn send(
        &self,
        target: Option<Authority>,
        parts: &Parts,
        body: Bytes,
        path_and_query: &str,
    ) -> HttpResult<UpstreamResponse> {
        let resp = match target {
            Some(authority) => {
                let uri = format!("http://{authority}{path_and_query}");
                let req = build_request(parts, body, &uri, authority.as_str())?;
                debug!(%uri, "forwarding to explicit upstream");
                self.client
                    .request(req)
                    .await
                    .map_err(|e| HttpError::FailedToGetResponseFromUpstream(e.to_string()))?
            }
            None => {
                let upstream = self.default_upstream.as_ref().ok_or(HttpError::NoUpstream)?;
                let authority = upstream.addr.to_string();
                match &upstream.tls {
                    Some(connector) => {
                        let req = build_request(parts, body, path_and_query, &authority)?;
                        debug!(%authority, path = %path_and_query, "forwarding to default tls upstream");
                        self.send_tls(connector, upstream.addr, req).await?
                    }
                    None => {
                        let uri = format!("http://{authority}{path_and_query}");
                        let req = build_request(parts, body, &uri, &authority)?;
                        debug!(%uri, "forwarding to default upstream");
                        self.client
                            .request(req)
                            .await
                            .map_err(|e| HttpError::FailedToGetResponseFromUpstream(e.to_string()))?
                    }
                }
            }
        };
        buffer_response(resp).await
    }

    async fn send_tls(
        &self,
        connector: &TlsConnector,
        addr: SocketAddr,
        req: Request<Full<Bytes>>,
    ) -> HttpResult<Response<Incoming>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HttpError::FailedToConnect(format!("{addr}: connect timed out")))?
            .map_err(|e| HttpError::FailedToConnect(format!("{addr}: {e}")))?;
        let server_name = ServerName::try_from(UPSTREAM_SERVER_NAME)
            .map_err(|e| HttpError::FailedToConnect(e.to_string()))?;
        let tls = timeout(self.connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| HttpError::FailedToConnect(format!("{addr}: tls handshake timed out")))?
            .map_err(|e| HttpError::FailedToConnect(format!("{addr}: {e}")))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| HttpError::FailedToConnect(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "upstream tls connection closed with error");
            }
        });

        sender
            .send_request(req)
            .await
            .map_err(|e| HttpError::FailedToGetResponseFromUpstream(e.to_string()))
    }
}

fn build_request(
    parts: &Parts,
    body: Bytes,
    uri: &str,
    host: &str,
) -> HttpResult<Request<Full<Bytes>>> {
    let uri = uri.parse::<Uri>().map_err(|e| HttpError::InvalidUri(e.to_string()))?;
    let mut req = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Full::new(body))
        .map_err(|e| HttpError::FailedToGenerateUpstreamRequest(e.to_string()))?;

    let headers = req.headers_mut();
    *headers = end_to_end_headers(&parts.headers);
    let host = HeaderValue::from_str(host)
        .map_err(|e| HttpError::FailedToGenerateUpstreamRequest(e.to_string()))?;
    headers.insert(HOST, host);
    Ok(req)
}

async fn buffer_response(resp: Response<Incoming>) -> HttpResult<UpstreamResponse> {
    let (parts, body) = resp.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| HttpError::FailedToGetResponseFromUpstream(e.to_string()))?
        .to_bytes();
    let mut headers = end_to_end_headers(&parts.headers);
    headers.remove(http::header::CONTENT_LENGTH);
    Ok(UpstreamResponse { status: parts.status, headers, body })
}

/// Joins the path below the context path with the original query
pub(crate) fn path_and_query(path_within: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{path_within}?{q}"),
        None => path_within.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_host(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_str(host).unwrap());
        headers
    }

    #[test]
    fn test_self_addressed_host_uses_default_upstream() {
        let uri: Uri = "/echo".parse().unwrap();
        let target = resolve_target(&uri, &headers_with_host("localhost:8080"), &[8080, 8443]);
        assert!(matches!(target, Ok(None)));

        let target = resolve_target(&uri, &headers_with_host("127.0.0.1:8443"), &[8080, 8443]);
        assert!(matches!(target, Ok(None)));
    }

    #[test]
    fn test_foreign_host_is_forwarded() {
        let uri: Uri = "/echo".parse().unwrap();
        let target =
            resolve_target(&uri, &headers_with_host("127.0.0.1:9000"), &[8080]).unwrap();
        assert_eq!(target.map(|a| a.to_string()), Some("127.0.0.1:9000".to_string()));
    }

    #[test]
    fn test_absolute_uri_wins_over_host_header() {
        let uri: Uri = "http://127.0.0.1:9100/echo".parse().unwrap();
        let target =
            resolve_target(&uri, &headers_with_host("localhost:8080"), &[8080]).unwrap();
        assert_eq!(target.map(|a| a.to_string()), Some("127.0.0.1:9100".to_string()));
    }

    #[test]
    fn test_https_target_is_rejected() {
        let uri: Uri = "https://example.com/".parse().unwrap();
        let err = resolve_target(&uri, &HeaderMap::new(), &[8080]).err();
        assert!(matches!(err, Some(HttpError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        let out = end_to_end_headers(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("accept"));
    }

    #[test]
    fn test_path_and_query() {
        assert_eq!(path_and_query("/echo", Some("a=1")), "/echo?a=1");
        assert_eq!(path_and_query("/", None), "/");
    }
}
