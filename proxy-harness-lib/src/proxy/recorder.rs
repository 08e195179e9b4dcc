use std::collections::BTreeMap;
use std::sync::Mutex;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// A request seen by the proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    /// Path below the context path
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Arrived on the TLS listener
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// A forwarded exchange, replayable as an expectation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedExpectation {
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

#[derive(Default)]
struct LogInner {
    requests: Vec<RecordedRequest>,
    expectations: Vec<RecordedExpectation>,
}

/// In-memory state accumulated by the proxy between resets
#[derive(Default)]
pub struct RequestLog {
    inner: Mutex<LogInner>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, request: RecordedRequest) {
        self.lock().requests.push(request);
    }

    pub fn record_expectation(&self, expectation: RecordedExpectation) {
        self.lock().expectations.push(expectation);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn expectations(&self) -> Vec<RecordedExpectation> {
        self.lock().expectations.clone()
    }

    /// Clears everything, returning how many requests were dropped
    pub fn reset(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.requests.len();
        inner.requests.clear();
        inner.expectations.clear();
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        // A panic while holding the lock cannot leave the vectors half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Flattens headers into a sorted map, joining repeated values with ", "
pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> RecordedRequest {
        RecordedRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            query: None,
            headers: BTreeMap::new(),
            body: String::new(),
            secure: false,
        }
    }

    #[test]
    fn test_reset_clears_requests_and_expectations() {
        let log = RequestLog::new();
        log.record_request(request("/a"));
        log.record_request(request("/b"));
        log.record_expectation(RecordedExpectation {
            request: request("/a"),
            response: RecordedResponse { status: 200, headers: BTreeMap::new(), body: String::new() },
        });

        assert_eq!(log.reset(), 2);
        assert!(log.requests().is_empty());
        assert!(log.expectations().is_empty());
    }

    #[test]
    fn test_header_map_joins_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "one".parse().unwrap());
        headers.append("x-tag", "two".parse().unwrap());
        let map = header_map(&headers);
        assert_eq!(map.get("x-tag").map(String::as_str), Some("one, two"));
    }
}
