mod echo;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{KeystoreConfig, TimeoutConfig};
use crate::error::{HarnessError, Result};
use crate::host::{HostServer, Scheme};
use crate::identity::TlsIdentity;
use crate::readiness::{wait_until_reachable, ProbePolicy};

pub use echo::{EchoEndpoint, EchoReply};

/// How to start an [`UpstreamServer`]
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
    /// Serve over TLS with an in-memory identity
    pub tls: bool,
    /// Fixed port, ephemeral when None
    pub port: Option<u16>,
    pub keystore: KeystoreConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            tls: false,
            port: None,
            keystore: KeystoreConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Echo test double that proxied requests end up at
pub struct UpstreamServer {
    host: HostServer,
    addr: SocketAddr,
    identity: Option<TlsIdentity>,
    shutdown_limit: Duration,
}

impl UpstreamServer {
    /// Starts the echo upstream and waits until it accepts connections
    pub async fn start(options: UpstreamOptions) -> Result<Self> {
        let port = options.port.unwrap_or(0);
        let mut host = HostServer::new();
        host.set_tls_handshake_timeout(options.timeouts.tls_handshake());
        host.add_endpoint("", Arc::new(EchoEndpoint));

        let identity = if options.tls {
            let identity = TlsIdentity::ephemeral(
                &options.keystore.alias,
                options.keystore.format,
                &options.keystore.subject_alt_names,
            )?;
            host.add_secure_connector(port, identity.clone());
            Some(identity)
        } else {
            host.set_port(port);
            None
        };

        host.start()
            .await
            .map_err(|e| HarnessError::Startup(format!("echo upstream: {e}")))?;

        let scheme = if options.tls { Scheme::Https } else { Scheme::Http };
        let addr = host
            .info()
            .and_then(|info| info.listeners.iter().find(|l| l.scheme == scheme))
            .map(|l| l.addr)
            .ok_or_else(|| HarnessError::Startup("echo upstream has no listener".to_string()))?;

        let mut server = Self {
            host,
            addr,
            identity,
            shutdown_limit: options.timeouts.shutdown(),
        };
        if let Err(e) = wait_until_reachable(addr, ProbePolicy::from_timeouts(&options.timeouts)).await {
            server.host.stop();
            return Err(e);
        }
        info!(%addr, tls = options.tls, "echo upstream started");
        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.identity.is_some()
    }

    /// Identity presented by a TLS upstream
    pub fn identity(&self) -> Option<&TlsIdentity> {
        self.identity.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    /// Stops the upstream and waits for its connections to drain. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.host.is_running() {
            return Ok(());
        }
        self.host.stop();
        self.host.await_termination(self.shutdown_limit).await?;
        info!(addr = %self.addr, "echo upstream stopped");
        Ok(())
    }
}
