use std::fmt;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::endpoint::{Endpoint, HostInfo, ListenerInfo, Scheme, StartupListener};
use super::guards::ConnectionGuard;
use super::router::{ConnectionInfo, Mount, Router};
use crate::config::normalize_prefix;
use crate::error::{HarnessError, Result};
use crate::identity::TlsIdentity;
use crate::tls::build_acceptor;

const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Configured,
    Running,
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Configured => "configured",
            HostState::Running => "running",
            HostState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct SecureConnector {
    port: u16,
    identity: TlsIdentity,
}

/// Embedded HTTP host serving mounted endpoints on plaintext and TLS listeners.
///
/// Configure it with [`set_port`](Self::set_port) (the default plaintext
/// connector), [`add_secure_connector`](Self::add_secure_connector) and
/// [`add_endpoint`](Self::add_endpoint), then [`start`](Self::start) it. Port 0
/// binds an ephemeral port; [`info`](Self::info) reports what was bound.
pub struct HostServer {
    bind_ip: IpAddr,
    plain_port: Option<u16>,
    redirect_port: Option<u16>,
    secure: Vec<SecureConnector>,
    mounts: Vec<Mount>,
    startup_listeners: Vec<Arc<dyn StartupListener>>,
    tls_handshake_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    active_connections: Arc<AtomicUsize>,
    info: Option<HostInfo>,
    state: HostState,
}

impl HostServer {
    pub fn new() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            plain_port: None,
            redirect_port: None,
            secure: Vec::new(),
            mounts: Vec::new(),
            startup_listeners: Vec::new(),
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active_connections: Arc::new(AtomicUsize::new(0)),
            info: None,
            state: HostState::Configured,
        }
    }

    pub fn set_bind_ip(&mut self, ip: IpAddr) -> &mut Self {
        self.bind_ip = ip;
        self
    }

    /// Sets the port of the default plaintext connector
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.plain_port = Some(port);
        self
    }

    /// Points the plaintext connector at a secure port, reported in [`HostInfo`]
    pub fn set_redirect_port(&mut self, port: u16) -> &mut Self {
        self.redirect_port = Some(port);
        self
    }

    /// Adds a TLS connector terminating with `identity`
    pub fn add_secure_connector(&mut self, port: u16, identity: TlsIdentity) -> &mut Self {
        self.secure.push(SecureConnector { port, identity });
        self
    }

    /// Mounts `endpoint` under `prefix` and every sub-path of it
    pub fn add_endpoint(&mut self, prefix: &str, endpoint: Arc<dyn Endpoint>) -> &mut Self {
        self.mounts.push(Mount { prefix: normalize_prefix(prefix), endpoint });
        self
    }

    pub fn add_startup_listener(&mut self, listener: Arc<dyn StartupListener>) -> &mut Self {
        self.startup_listeners.push(listener);
        self
    }

    pub fn set_tls_handshake_timeout(&mut self, limit: Duration) -> &mut Self {
        self.tls_handshake_timeout = limit;
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == HostState::Running
    }

    /// Bound listeners, available once started
    pub fn info(&self) -> Option<&HostInfo> {
        self.info.as_ref()
    }

    /// Ports of every bound listener, empty before start
    pub fn local_ports(&self) -> Vec<u16> {
        self.info.as_ref().map(HostInfo::ports).unwrap_or_default()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Binds every connector, runs startup listeners and starts serving.
    ///
    /// Returns once all listeners accept connections. On failure nothing stays
    /// bound and the host can be dropped.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != HostState::Configured {
            return Err(HarnessError::Startup(format!("host already {}", self.state)));
        }
        if self.plain_port.is_none() && self.secure.is_empty() {
            return Err(HarnessError::Startup("host has no connectors".to_string()));
        }

        let mut bound: Vec<(ListenerInfo, TcpListener, Option<TlsAcceptor>)> = Vec::new();
        if let Some(port) = self.plain_port {
            let (info, listener) = bind(self.bind_ip, port, Scheme::Http).await?;
            bound.push((info, listener, None));
        }
        for connector in &self.secure {
            let acceptor = build_acceptor(&connector.identity).map_err(|e| {
                HarnessError::Startup(format!("secure connector on port {}: {e}", connector.port))
            })?;
            let (info, listener) = bind(self.bind_ip, connector.port, Scheme::Https).await?;
            bound.push((info, listener, Some(acceptor)));
        }

        let info = HostInfo {
            listeners: bound.iter().map(|(info, _, _)| *info).collect(),
            redirect_port: self.redirect_port.filter(|_| self.plain_port.is_some()),
        };
        for listener in &self.startup_listeners {
            listener
                .on_startup(&info)
                .map_err(|e| HarnessError::Startup(format!("startup listener failed: {e}")))?;
        }

        let router = Arc::new(Router::new(std::mem::take(&mut self.mounts)));
        for (listener_info, listener, acceptor) in bound {
            let ctx = AcceptContext {
                info: listener_info,
                acceptor,
                router: router.clone(),
                shutdown: self.shutdown.clone(),
                tracker: self.tracker.clone(),
                active_connections: self.active_connections.clone(),
                tls_handshake_timeout: self.tls_handshake_timeout,
            };
            self.tracker.spawn(accept_loop(listener, ctx));
        }

        info!(ports = ?info.ports(), "host started");
        self.info = Some(info);
        self.state = HostState::Running;
        Ok(())
    }

    /// Stops accepting and asks open connections to finish. Idempotent.
    pub fn stop(&mut self) {
        if self.state == HostState::Stopped {
            return;
        }
        info!(
            active_connections = self.active_connections(),
            "stopping host"
        );
        self.shutdown.cancel();
        self.tracker.close();
        self.state = HostState::Stopped;
    }

    /// Waits until every listener and connection task has finished, at most `limit`
    pub async fn await_termination(&self, limit: Duration) -> Result<()> {
        match self.state {
            HostState::Configured => return Ok(()),
            HostState::Running => {
                return Err(HarnessError::InvalidState {
                    expected: "stopped",
                    found: self.state.to_string(),
                })
            }
            HostState::Stopped => {}
        }

        match timeout(limit, self.tracker.wait()).await {
            Ok(()) => {
                info!("host terminated");
                Ok(())
            }
            Err(_) => {
                warn!(
                    active_connections = self.active_connections(),
                    "host did not terminate within {limit:?}"
                );
                Err(HarnessError::Io(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("host tasks still running after {limit:?}"),
                )))
            }
        }
    }
}

impl Default for HostServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn bind(ip: IpAddr, port: u16, scheme: Scheme) -> Result<(ListenerInfo, TcpListener)> {
    let listener = TcpListener::bind((ip, port)).await.map_err(|e| {
        HarnessError::Startup(format!("Failed to bind {scheme} listener on {ip}:{port}: {e}"))
    })?;
    let addr = listener.local_addr()?;
    debug!(%scheme, %addr, "listener bound");
    Ok((ListenerInfo { scheme, addr }, listener))
}

struct AcceptContext {
    info: ListenerInfo,
    acceptor: Option<TlsAcceptor>,
    router: Arc<Router>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    active_connections: Arc<AtomicUsize>,
    tls_handshake_timeout: Duration,
}

async fn accept_loop(listener: TcpListener, ctx: AcceptContext) {
    let ListenerInfo { scheme, addr } = ctx.info;
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(%scheme, error = %e, "accept error");
                        continue;
                    }
                };

                let guard = ConnectionGuard::new(ctx.active_connections.clone());
                let conn = ConnectionInfo { scheme, local_addr: addr, peer };
                let router = ctx.router.clone();
                let shutdown = ctx.shutdown.clone();
                let acceptor = ctx.acceptor.clone();
                let handshake_limit = ctx.tls_handshake_timeout;

                ctx.tracker.spawn(async move {
                    let _guard = guard;
                    match acceptor {
                        Some(acc) => {
                            let handshake = tokio::select! {
                                res = timeout(handshake_limit, acc.accept(stream)) => res,
                                _ = shutdown.cancelled() => {
                                    debug!(?peer, "tls handshake abandoned on shutdown");
                                    return;
                                }
                            };
                            match handshake {
                                Ok(Ok(tls)) => serve_connection(TokioIo::new(tls), conn, router, shutdown).await,
                                Ok(Err(e)) => debug!(?peer, error = %e, "tls accept error"),
                                Err(_) => warn!(?peer, "tls handshake timed out"),
                            }
                        }
                        None => serve_connection(TokioIo::new(stream), conn, router, shutdown).await,
                    }
                });
            }
        }
    }
    drop(listener);
    info!(%scheme, %addr, "listener closed");
}

async fn serve_connection<I>(
    io: I,
    conn: ConnectionInfo,
    router: Arc<Router>,
    shutdown: CancellationToken,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        async move { Ok::<_, hyper::Error>(router.dispatch(req, conn).await) }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(io, svc);
    tokio::pin!(connection);

    tokio::select! {
        res = connection.as_mut() => {
            if let Err(e) = res {
                debug!(peer = ?conn.peer, error = %e, "serve_connection error");
            }
        }
        _ = shutdown.cancelled() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.as_mut().await {
                debug!(peer = ?conn.peer, error = %e, "connection closed during shutdown");
            }
        }
    }
}
