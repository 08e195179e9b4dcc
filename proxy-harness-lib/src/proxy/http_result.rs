use http::StatusCode;
use thiserror::Error;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is turned into a synthetic error response by the endpoint
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong while the proxy handles a request
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("Proxy endpoint is not initialized")]
    NotInitialized,

    #[error("Invalid host in request header")]
    InvalidHostInRequestHeader,

    #[error("No upstream to forward to")]
    NoUpstream,

    #[error("Unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Unknown control operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid retrieve type: {0}")]
    InvalidRetrieveType(String),

    #[error("Failed to read request body: {0}")]
    FailedToReadRequestBody(String),

    #[error("Failed to generate upstream request: {0}")]
    FailedToGenerateUpstreamRequest(String),

    #[error("Failed to connect to upstream: {0}")]
    FailedToConnect(String),

    #[error("Failed to get response from upstream: {0}")]
    FailedToGetResponseFromUpstream(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        match e {
            HttpError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::InvalidHostInRequestHeader => StatusCode::BAD_REQUEST,
            HttpError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::UnsupportedScheme(_) => StatusCode::BAD_GATEWAY,
            HttpError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            HttpError::InvalidRetrieveType(_) => StatusCode::BAD_REQUEST,
            HttpError::FailedToReadRequestBody(_) => StatusCode::BAD_REQUEST,
            HttpError::FailedToGenerateUpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::FailedToConnect(_) => StatusCode::BAD_GATEWAY,
            HttpError::FailedToGetResponseFromUpstream(_) => StatusCode::BAD_GATEWAY,
            HttpError::InvalidUri(_) => StatusCode::BAD_REQUEST,
        }
    }
}
