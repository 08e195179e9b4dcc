#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod port;
pub mod proxy;
pub mod readiness;
pub mod session;
pub mod telemetry;
pub mod tls;
pub mod upstream;

pub use client::ProxyClient;
pub use config::{load_from_path, SessionConfig};
pub use error::{HarnessError, Result};
pub use host::{Endpoint, HostServer, StartupListener};
pub use identity::{IdentityProvisioner, KeyStore, KeystoreFormat, KeystoreSettings, TlsIdentity};
pub use port::PortAllocator;
pub use proxy::ProxyEndpoint;
pub use session::{Session, SessionPorts, SessionState, TeardownReport, TeardownStep};
pub use upstream::{UpstreamOptions, UpstreamServer};
