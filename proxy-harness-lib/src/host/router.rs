use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tracing::debug;

use super::endpoint::{status_response, Endpoint, RequestContext, RespBody, Scheme};

pub(crate) struct Mount {
    /// Normalized prefix without surrounding slashes, "" for the root
    pub prefix: String,
    pub endpoint: Arc<dyn Endpoint>,
}

/// Dispatches requests to the endpoint with the longest matching prefix
pub(crate) struct Router {
    mounts: Vec<Mount>,
}

/// Connection-level facts needed to build a [`RequestContext`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionInfo {
    pub scheme: Scheme,
    pub local_addr: SocketAddr,
    pub peer: SocketAddr,
}

impl Router {
    pub fn new(mut mounts: Vec<Mount>) -> Self {
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { mounts }
    }

    pub async fn dispatch(&self, req: Request<Incoming>, conn: ConnectionInfo) -> Response<RespBody> {
        let path = req.uri().path().to_string();
        for mount in &self.mounts {
            if let Some(within) = match_prefix(&mount.prefix, &path) {
                let ctx = RequestContext {
                    scheme: conn.scheme,
                    local_addr: conn.local_addr,
                    peer: conn.peer,
                    context_path: context_path(&mount.prefix),
                    path_within: within.to_string(),
                };
                return mount.endpoint.handle(req, ctx).await;
            }
        }
        debug!(%path, peer = %conn.peer, "no endpoint mounted for path");
        status_response(StatusCode::NOT_FOUND)
    }
}

/// Matches `path` against a prefix mapped to itself and every sub-path.
///
/// Returns the remainder below the prefix, which always starts with '/'.
pub fn match_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(if path.is_empty() { "/" } else { path });
    }
    let rest = path.strip_prefix('/')?.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn context_path(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("/{prefix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_prefix_root() {
        assert_eq!(match_prefix("", "/anything/below"), Some("/anything/below"));
        assert_eq!(match_prefix("", ""), Some("/"));
    }

    #[test]
    fn test_match_prefix_exact_and_below() {
        assert_eq!(match_prefix("proxy", "/proxy"), Some("/"));
        assert_eq!(match_prefix("proxy", "/proxy/"), Some("/"));
        assert_eq!(match_prefix("proxy", "/proxy/echo/1"), Some("/echo/1"));
    }

    #[test]
    fn test_match_prefix_rejects_siblings() {
        assert_eq!(match_prefix("proxy", "/proxying"), None);
        assert_eq!(match_prefix("proxy", "/other/proxy"), None);
        assert_eq!(match_prefix("proxy", "/"), None);
    }

    #[test]
    fn test_match_prefix_nested() {
        assert_eq!(match_prefix("a/b", "/a/b/c"), Some("/c"));
        assert_eq!(match_prefix("a/b", "/a/c"), None);
    }
}
