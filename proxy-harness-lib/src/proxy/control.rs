use serde::{Deserialize, Serialize};

use crate::proxy::http_result::{HttpError, HttpResult};

/// Path, relative to the context path, under which control operations live
pub const CONTROL_PREFIX: &str = "/_control/";

/// Operation requested through the control API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Reset,
    Retrieve(RetrieveType),
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrieveType {
    #[default]
    Requests,
    RecordedExpectations,
}

impl RetrieveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieveType::Requests => "requests",
            RetrieveType::RecordedExpectations => "recorded_expectations",
        }
    }
}

/// Body of `/_control/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub ports: Vec<u16>,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    #[serde(default)]
    pub redirect_port: Option<u16>,
    pub recorded_requests: usize,
}

impl ControlOp {
    /// Parses the operation name following [`CONTROL_PREFIX`] and its query
    pub fn parse(name: &str, query: Option<&str>) -> HttpResult<Self> {
        match name.trim_end_matches('/') {
            "reset" => Ok(ControlOp::Reset),
            "status" => Ok(ControlOp::Status),
            "retrieve" => {
                let requested = query
                    .into_iter()
                    .flat_map(|q| q.split('&'))
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(key, _)| *key == "type")
                    .map(|(_, value)| value);
                let kind = match requested {
                    None => RetrieveType::default(),
                    Some(v) if v.eq_ignore_ascii_case("requests") => RetrieveType::Requests,
                    Some(v) if v.eq_ignore_ascii_case("recorded_expectations") => {
                        RetrieveType::RecordedExpectations
                    }
                    Some(other) => return Err(HttpError::InvalidRetrieveType(other.to_string())),
                };
                Ok(ControlOp::Retrieve(kind))
            }
            other => Err(HttpError::UnknownOperation(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operations() {
        assert_eq!(ControlOp::parse("reset", None).ok(), Some(ControlOp::Reset));
        assert_eq!(ControlOp::parse("status/", None).ok(), Some(ControlOp::Status));
        assert_eq!(
            ControlOp::parse("retrieve", None).ok(),
            Some(ControlOp::Retrieve(RetrieveType::Requests))
        );
        assert_eq!(
            ControlOp::parse("retrieve", Some("format=json&type=RECORDED_EXPECTATIONS")).ok(),
            Some(ControlOp::Retrieve(RetrieveType::RecordedExpectations))
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(
            ControlOp::parse("retrieve", Some("type=logs")),
            Err(HttpError::InvalidRetrieveType(_))
        ));
        assert!(matches!(ControlOp::parse("clear", None), Err(HttpError::UnknownOperation(_))));
    }
}
