use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::normalize_prefix;
use crate::error::{HarnessError, Result};
use crate::proxy::{RecordedExpectation, RecordedRequest, RetrieveType, StatusReport, CONTROL_PREFIX};

/// Handle used by tests to drive the proxy endpoint and its control API
#[derive(Debug)]
pub struct ProxyClient {
    http: reqwest::Client,
    host: String,
    port: u16,
    path_prefix: String,
    base_url: String,
    stopped: AtomicBool,
}

impl ProxyClient {
    /// Builds a client for `http://host:port/path_prefix`, ignoring proxy environment variables
    pub fn new(host: &str, port: u16, path_prefix: &str, request_timeout: Duration) -> Result<Self> {
        let path_prefix = normalize_prefix(path_prefix);
        let base_url = if path_prefix.is_empty() {
            format!("http://{host}:{port}")
        } else {
            format!("http://{host}:{port}/{path_prefix}")
        };
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            host: host.to_string(),
            port,
            path_prefix,
            base_url,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Base URL including the context path, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Clears every request and expectation recorded by the proxy
    pub async fn reset(&self) -> Result<()> {
        self.control("reset", None).await?;
        debug!(port = self.port, "proxy reset");
        Ok(())
    }

    pub async fn retrieve_recorded_requests(&self) -> Result<Vec<RecordedRequest>> {
        self.retrieve(RetrieveType::Requests).await
    }

    pub async fn retrieve_recorded_expectations(&self) -> Result<Vec<RecordedExpectation>> {
        self.retrieve(RetrieveType::RecordedExpectations).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let resp = self.control("status", None).await?;
        Ok(resp.json().await?)
    }

    /// Request to `path` below the context path, sent through the proxy
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        self.ensure_running()?;
        let url = if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        };
        Ok(self.http.request(method, url))
    }

    /// Stops the client; later calls fail with [`HarnessError::ClientStopped`]. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(base_url = %self.base_url, "proxy client stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn retrieve<T: DeserializeOwned>(&self, kind: RetrieveType) -> Result<T> {
        let resp = self.control("retrieve", Some(kind.as_str())).await?;
        Ok(resp.json().await?)
    }

    async fn control(&self, operation: &str, retrieve_type: Option<&str>) -> Result<Response> {
        self.ensure_running()?;
        let url = match retrieve_type {
            Some(kind) => format!("{}{CONTROL_PREFIX}{operation}?type={kind}", self.base_url),
            None => format!("{}{CONTROL_PREFIX}{operation}", self.base_url),
        };
        let resp = self.http.put(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HarnessError::Client(format!(
                "{operation} returned {status}: {}",
                body.trim()
            )));
        }
        Ok(resp)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(HarnessError::ClientStopped)
        } else {
            Ok(())
        }
    }
}
