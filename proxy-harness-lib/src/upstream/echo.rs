use async_trait::async_trait;
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};

use crate::host::{json_response, synthetic_response, Endpoint, RequestContext, RespBody};

/// What the echo upstream answers for every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoReply {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: String,
}

/// Endpoint answering `200` with a JSON description of the request
#[derive(Debug, Default)]
pub struct EchoEndpoint;

#[async_trait]
impl Endpoint for EchoEndpoint {
    async fn handle(&self, req: Request<Incoming>, ctx: RequestContext) -> Response<RespBody> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return synthetic_response(
                    StatusCode::BAD_REQUEST,
                    "text/plain; charset=utf-8",
                    format!("Failed to read request body: {e}"),
                )
            }
        };
        let reply = EchoReply {
            method: parts.method.to_string(),
            path: ctx.path_within,
            query: parts.uri.query().map(str::to_string),
            body: String::from_utf8_lossy(&body).into_owned(),
        };
        json_response(StatusCode::OK, &reply)
    }
}
