use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};

use crate::error::Result;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Protocol spoken by a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bound listener of a running host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerInfo {
    pub scheme: Scheme,
    pub addr: SocketAddr,
}

/// Listeners of a host, as seen by startup listeners and endpoints
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub listeners: Vec<ListenerInfo>,
    /// Secure port plaintext clients are pointed at when confidentiality is required
    pub redirect_port: Option<u16>,
}

impl HostInfo {
    /// First port bound for `scheme`
    pub fn port(&self, scheme: Scheme) -> Option<u16> {
        self.listeners.iter().find(|l| l.scheme == scheme).map(|l| l.addr.port())
    }

    pub fn ports(&self) -> Vec<u16> {
        self.listeners.iter().map(|l| l.addr.port()).collect()
    }

    pub fn serves_port(&self, port: u16) -> bool {
        self.listeners.iter().any(|l| l.addr.port() == port)
    }
}

/// Per-request routing information handed to an endpoint
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scheme: Scheme,
    pub local_addr: SocketAddr,
    pub peer: SocketAddr,
    /// Mount point of the endpoint, "" or "/prefix"
    pub context_path: String,
    /// Request path below the context path, always starting with '/'
    pub path_within: String,
}

/// Request handler mounted under a path prefix of a host
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, req: Request<Incoming>, ctx: RequestContext) -> Response<RespBody>;
}

/// Hook run once by the host after binding its listeners and before serving
pub trait StartupListener: Send + Sync {
    fn on_startup(&self, host: &HostInfo) -> Result<()>;
}

pub fn full_body(bytes: impl Into<Bytes>) -> RespBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Response with a fixed status, content type and body
pub fn synthetic_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<RespBody> {
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// Plain-text response carrying the canonical reason of `status`
pub fn status_response(status: StatusCode) -> Response<RespBody> {
    synthetic_response(
        status,
        "text/plain; charset=utf-8",
        status.canonical_reason().unwrap_or("").to_string(),
    )
}

/// JSON response, falling back to 500 when `value` cannot be serialized
pub fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<RespBody> {
    match serde_json::to_vec(value) {
        Ok(body) => synthetic_response(status, "application/json", body),
        Err(_) => status_response(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
