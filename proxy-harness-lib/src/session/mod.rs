mod state;
mod teardown;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::client::ProxyClient;
use crate::config::SessionConfig;
use crate::error::{HarnessError, Result};
use crate::host::{HostServer, Scheme};
use crate::identity::{FormatSnapshot, IdentityProvisioner, KeystoreSettings, TlsIdentity};
use crate::port::PortAllocator;
use crate::proxy::{DefaultUpstream, ProxyEndpoint};
use crate::readiness::{wait_until_reachable, wait_until_released, ProbePolicy};
use crate::upstream::{UpstreamOptions, UpstreamServer};

pub use state::SessionState;
pub use teardown::{TeardownOutcome, TeardownReport, TeardownStep};

/// Listener ports of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPorts {
    pub http: u16,
    pub https: u16,
}

/// One test-suite run of the proxy: echo upstream, dual-listener host, client.
///
/// Build it once per suite, [`start`](Self::start) it (or use
/// [`launch`](Self::launch)), call [`reset_before_each_case`](Self::reset_before_each_case)
/// before every case and [`stop`](Self::stop) at the end. Teardown runs even
/// after a failed start and never returns an error.
pub struct Session {
    config: SessionConfig,
    settings: KeystoreSettings,
    allocator: &'static PortAllocator,
    state: SessionState,
    saved_format: Option<FormatSnapshot>,
    upstream: Option<UpstreamServer>,
    host: Option<HostServer>,
    proxy: Option<Arc<ProxyEndpoint>>,
    client: Option<ProxyClient>,
    identity: Option<TlsIdentity>,
    ports: Option<SessionPorts>,
    bound: Vec<SocketAddr>,
    torn_down: bool,
}

impl Session {
    /// Session using the process-wide keystore settings
    pub fn new(config: SessionConfig) -> Self {
        Self::with_settings(config, KeystoreSettings::global().clone())
    }

    pub fn with_settings(config: SessionConfig, settings: KeystoreSettings) -> Self {
        Self {
            config,
            settings,
            allocator: PortAllocator::global(),
            state: SessionState::Unstarted,
            saved_format: None,
            upstream: None,
            host: None,
            proxy: None,
            client: None,
            identity: None,
            ports: None,
            bound: Vec::new(),
            torn_down: false,
        }
    }

    /// Starts a session, tearing down whatever started when a step fails
    pub async fn launch(config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(config);
        if let Err(e) = session.start().await {
            let report = session.stop().await;
            debug!(clean = report.is_clean(), "teardown after failed launch");
            return Err(e);
        }
        Ok(session)
    }

    /// Runs the startup sequence. Any failure leaves the session `Failed`;
    /// [`stop`](Self::stop) still has to run to release what was started.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(HarnessError::InvalidState {
                expected: "unstarted",
                found: self.state.to_string(),
            });
        }
        self.state = SessionState::Starting;
        info!(prefix = %self.config.normalized_prefix(), "starting session");

        match self.start_steps().await {
            Ok(()) => {
                self.state = SessionState::Running;
                if let Some(ports) = self.ports {
                    info!(
                        http_port = ports.http,
                        https_port = ports.https,
                        upstream_port = ?self.upstream_port(),
                        "session running"
                    );
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "session startup failed");
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    async fn start_steps(&mut self) -> Result<()> {
        let probe = ProbePolicy::from_timeouts(&self.config.timeout);

        // 1. upstream
        let upstream = UpstreamServer::start(UpstreamOptions {
            tls: self.config.upstream.tls,
            port: self.config.upstream.port,
            keystore: self.config.keystore.clone(),
            timeouts: self.config.timeout.clone(),
        })
        .await?;
        let default_upstream = match upstream.identity() {
            Some(identity) => DefaultUpstream::tls(upstream.addr(), &identity.certificate_pem)?,
            None => DefaultUpstream::plain(upstream.addr()),
        };
        self.bound.push(upstream.addr());
        self.upstream = Some(upstream);

        // 2. ports
        let ports = self.allocate_ports()?;
        self.ports = Some(ports);
        debug!(http_port = ports.http, https_port = ports.https, "ports allocated");

        // 3. identity, saving the active format first
        self.saved_format = Some(self.settings.snapshot());
        let provisioner = IdentityProvisioner::new(self.settings.clone(), self.config.keystore.clone());
        let identity = provisioner
            .ensure_identity(self.config.keystore.format)
            .map_err(|e| match e {
                HarnessError::Provisioning(_) => e,
                other => HarnessError::Provisioning(other.to_string()),
            })?;
        debug!(alias = %identity.alias, origin = ?identity.origin, "tls identity ready");

        // 4. host with plaintext default connector and one tls connector
        let mut host = HostServer::new();
        host.set_port(ports.http)
            .set_redirect_port(ports.https)
            .add_secure_connector(ports.https, identity.clone())
            .set_tls_handshake_timeout(self.config.timeout.tls_handshake());
        self.identity = Some(identity);

        // 5. proxy endpoint under the context path
        let proxy = Arc::new(ProxyEndpoint::new(Some(default_upstream), self.config.timeout.connect()));
        host.add_endpoint(&self.config.path_prefix, proxy.clone())
            .add_startup_listener(proxy.clone());
        self.proxy = Some(proxy);

        // 6. start
        let host = self.host.insert(host);
        host.start().await?;
        let addrs: Vec<SocketAddr> = host
            .info()
            .map(|info| info.listeners.iter().map(|l| l.addr).collect())
            .unwrap_or_default();
        self.bound.extend(addrs.iter().copied());
        for addr in addrs {
            wait_until_reachable(addr, probe).await?;
        }

        // 7. client
        let client = ProxyClient::new(
            &self.config.host,
            ports.http,
            &self.config.path_prefix,
            self.config.timeout.client_request(),
        )?;
        self.client = Some(client);
        Ok(())
    }

    fn allocate_ports(&self) -> Result<SessionPorts> {
        for port in [self.config.http_port, self.config.https_port].into_iter().flatten() {
            self.allocator.reserve(port);
        }
        let http = match self.config.http_port {
            Some(port) => port,
            None => self.allocator.allocate()?,
        };
        let https = match self.config.https_port {
            Some(port) => port,
            None => self.allocator.allocate()?,
        };
        Ok(SessionPorts { http, https })
    }

    /// Clears proxy state before a test case. Never touches the listeners.
    pub async fn reset_before_each_case(&self) -> Result<()> {
        if self.state != SessionState::Running {
            return Err(HarnessError::InvalidState {
                expected: "running",
                found: self.state.to_string(),
            });
        }
        let client = self.client.as_ref().ok_or(HarnessError::ClientStopped)?;
        client.reset().await
    }

    /// Tears the session down, best effort and in order.
    ///
    /// Every step runs even if an earlier one failed; failures are logged and
    /// collected in the report. A second call does nothing and returns an
    /// empty report.
    pub async fn stop(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            debug!(state = %self.state, "session already torn down");
            return report;
        }
        self.torn_down = true;
        let failed = self.state == SessionState::Failed;
        info!(state = %self.state, "stopping session");

        report.record(TeardownStep::RestoreKeystoreFormat, self.restore_format());
        report.record(TeardownStep::StopClient, self.stop_client());

        if !failed {
            self.state = SessionState::StoppingUpstream;
        }
        report.record(TeardownStep::StopUpstream, self.stop_upstream().await);

        if !failed {
            self.state = SessionState::StoppingHost;
        }
        report.record(TeardownStep::StopHost, self.stop_host().await);
        report.record(TeardownStep::AwaitRelease, self.await_release().await);

        for (step, e) in report.failures() {
            warn!(%step, error = %e, "teardown step failed");
        }
        self.state = if failed { SessionState::Failed } else { SessionState::Stopped };
        info!(state = %self.state, clean = report.is_clean(), "session stopped");
        report
    }

    fn restore_format(&mut self) -> Result<()> {
        if let Some(snapshot) = self.saved_format.take() {
            let current = self.settings.format();
            self.settings.restore(snapshot);
            debug!(from = %current, to = %snapshot.format(), "keystore format restored");
        }
        Ok(())
    }

    fn stop_client(&mut self) -> Result<()> {
        if let Some(client) = &self.client {
            client.stop();
        }
        Ok(())
    }

    async fn stop_upstream(&mut self) -> Result<()> {
        match self.upstream.as_mut() {
            Some(upstream) => upstream.stop().await,
            None => Ok(()),
        }
    }

    async fn stop_host(&mut self) -> Result<()> {
        match self.host.as_mut() {
            Some(host) => {
                host.stop();
                host.await_termination(self.config.timeout.shutdown()).await
            }
            None => Ok(()),
        }
    }

    async fn await_release(&mut self) -> Result<()> {
        let probe = ProbePolicy::from_timeouts(&self.config.timeout);
        let mut first_err = None;
        for addr in std::mem::take(&mut self.bound) {
            if let Err(e) = wait_until_released(addr, probe).await {
                warn!(%addr, error = %e, "listener still reachable after stop");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ports(&self) -> Option<SessionPorts> {
        self.ports
    }

    /// Client bound to the plaintext listener, once started
    pub fn client(&self) -> Option<&ProxyClient> {
        self.client.as_ref()
    }

    pub fn upstream_port(&self) -> Option<u16> {
        self.upstream.as_ref().map(UpstreamServer::port)
    }

    pub fn identity(&self) -> Option<&TlsIdentity> {
        self.identity.as_ref()
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_deref()
    }

    /// Whether the host process was started at all
    pub fn host_started(&self) -> bool {
        self.host.as_ref().is_some_and(|h| h.info().is_some())
    }

    /// Bound address of the session's listener for `scheme`
    pub fn listener_addr(&self, scheme: Scheme) -> Option<SocketAddr> {
        self.host
            .as_ref()
            .and_then(HostServer::info)
            .and_then(|info| info.listeners.iter().find(|l| l.scheme == scheme))
            .map(|l| l.addr)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn settings(&self) -> &KeystoreSettings {
        &self.settings
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(snapshot) = self.saved_format.take() {
            warn!("session dropped without stop, restoring keystore format");
            self.settings.restore(snapshot);
        }
    }
}
