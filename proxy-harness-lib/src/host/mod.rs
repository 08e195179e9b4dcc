pub mod endpoint;
pub mod guards;
mod router;
pub mod server;

pub use endpoint::{
    full_body, json_response, status_response, synthetic_response, Endpoint,
    HostInfo, ListenerInfo, RequestContext, RespBody, Scheme, StartupListener,
};
pub use router::match_prefix;
pub use server::{HostServer, HostState};
