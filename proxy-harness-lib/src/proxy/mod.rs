pub mod control;
pub mod endpoint;
pub mod forwarding;
pub mod http_result;
pub mod recorder;

pub use control::{ControlOp, RetrieveType, StatusReport, CONTROL_PREFIX};
pub use endpoint::ProxyEndpoint;
pub use forwarding::DefaultUpstream;
pub use http_result::HttpError;
pub use recorder::{RecordedExpectation, RecordedRequest, RecordedResponse, RequestLog};
