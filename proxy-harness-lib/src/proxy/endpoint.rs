use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::host::{
    full_body, json_response, status_response, synthetic_response, Endpoint, HostInfo,
    RequestContext, RespBody, Scheme, StartupListener,
};
use crate::proxy::control::{ControlOp, RetrieveType, StatusReport, CONTROL_PREFIX};
use crate::proxy::forwarding::{path_and_query, resolve_target, DefaultUpstream, Forwarder};
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::proxy::recorder::{
    header_map, RecordedExpectation, RecordedRequest, RecordedResponse, RequestLog,
};

/// Forward proxy endpoint that records every exchange.
///
/// Mount it on a [`HostServer`](crate::host::HostServer) and register it as a
/// startup listener too: until the host reports its listeners the endpoint
/// answers `503`.
pub struct ProxyEndpoint {
    log: RequestLog,
    forwarder: Forwarder,
    host: OnceLock<HostInfo>,
}

impl ProxyEndpoint {
    pub fn new(default_upstream: Option<DefaultUpstream>, connect_timeout: Duration) -> Self {
        Self {
            log: RequestLog::new(),
            forwarder: Forwarder::new(default_upstream, connect_timeout),
            host: OnceLock::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.host.get().is_some()
    }

    pub fn default_upstream(&self) -> Option<&DefaultUpstream> {
        self.forwarder.default_upstream()
    }

    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.log.requests()
    }

    pub fn recorded_expectations(&self) -> Vec<RecordedExpectation> {
        self.log.expectations()
    }

    /// Clears recorded state, returning how many requests were dropped
    pub fn reset(&self) -> usize {
        self.log.reset()
    }

    async fn route(&self, req: Request<Incoming>, ctx: &RequestContext) -> HttpResult<Response<RespBody>> {
        let host = self.host.get().ok_or(HttpError::NotInitialized)?;
        if let Some(name) = ctx.path_within.strip_prefix(CONTROL_PREFIX) {
            return self.control(req.method(), name, req.uri().query(), host);
        }
        self.forward(req, ctx, host).await
    }

    fn control(
        &self,
        method: &Method,
        name: &str,
        query: Option<&str>,
        host: &HostInfo,
    ) -> HttpResult<Response<RespBody>> {
        if method != Method::PUT {
            return Err(HttpError::MethodNotAllowed(method.to_string()));
        }
        match ControlOp::parse(name, query)? {
            ControlOp::Reset => {
                let dropped = self.reset();
                info!(dropped, "proxy state reset");
                Ok(status_response(StatusCode::OK))
            }
            ControlOp::Retrieve(kind) => {
                debug!(kind = kind.as_str(), "retrieving recorded state");
                Ok(match kind {
                    RetrieveType::Requests => json_response(StatusCode::OK, &self.log.requests()),
                    RetrieveType::RecordedExpectations => {
                        json_response(StatusCode::OK, &self.log.expectations())
                    }
                })
            }
            ControlOp::Status => {
                let report = StatusReport {
                    ports: host.ports(),
                    http_port: host.port(Scheme::Http),
                    https_port: host.port(Scheme::Https),
                    redirect_port: host.redirect_port,
                    recorded_requests: self.log.requests().len(),
                };
                Ok(json_response(StatusCode::OK, &report))
            }
        }
    }

    async fn forward(
        &self,
        req: Request<Incoming>,
        ctx: &RequestContext,
        host: &HostInfo,
    ) -> HttpResult<Response<RespBody>> {
        let target = resolve_target(req.uri(), req.headers(), &host.ports())?;
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| HttpError::FailedToReadRequestBody(e.to_string()))?
            .to_bytes();

        let query = parts.uri.query().map(str::to_string);
        let recorded = RecordedRequest {
            method: parts.method.to_string(),
            path: ctx.path_within.clone(),
            query: query.clone(),
            headers: header_map(&parts.headers),
            body: String::from_utf8_lossy(&body).into_owned(),
            secure: ctx.scheme == Scheme::Https,
        };
        self.log.record_request(recorded.clone());

        let pq = path_and_query(&ctx.path_within, query.as_deref());
        let upstream = self.forwarder.send(target, &parts, body, &pq).await?;

        self.log.record_expectation(RecordedExpectation {
            request: recorded,
            response: RecordedResponse {
                status: upstream.status.as_u16(),
                headers: header_map(&upstream.headers),
                body: String::from_utf8_lossy(&upstream.body).into_owned(),
            },
        });

        let mut resp = Response::new(full_body(upstream.body));
        *resp.status_mut() = upstream.status;
        *resp.headers_mut() = upstream.headers;
        Ok(resp)
    }
}

#[async_trait]
impl Endpoint for ProxyEndpoint {
    async fn handle(&self, req: Request<Incoming>, ctx: RequestContext) -> Response<RespBody> {
        let method = req.method().clone();
        match self.route(req, &ctx).await {
            Ok(resp) => resp,
            Err(e) => {
                let status = StatusCode::from(e.clone());
                if status.is_server_error() {
                    warn!(%method, path = %ctx.path_within, peer = %ctx.peer, error = %e, "proxy request failed");
                } else {
                    debug!(%method, path = %ctx.path_within, error = %e, "proxy request rejected");
                }
                synthetic_response(status, "text/plain; charset=utf-8", e.to_string())
            }
        }
    }
}

impl StartupListener for ProxyEndpoint {
    fn on_startup(&self, host: &HostInfo) -> Result<()> {
        self.host.set(host.clone()).map_err(|_| {
            HarnessError::Startup("proxy endpoint is already attached to a host".to_string())
        })?;
        info!(
            ports = ?host.ports(),
            default_upstream = ?self.default_upstream(),
            "proxy endpoint initialized"
        );
        Ok(())
    }
}
