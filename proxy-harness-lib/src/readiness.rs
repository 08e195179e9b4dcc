use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::config::TimeoutConfig;
use crate::error::{HarnessError, Result};

const MAX_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded polling schedule used in place of fixed settle sleeps
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    pub max_wait: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl ProbePolicy {
    pub fn new(max_wait: Duration, initial_interval: Duration) -> Self {
        Self { max_wait, initial_interval, max_interval: MAX_PROBE_INTERVAL }
    }

    pub fn from_timeouts(cfg: &TimeoutConfig) -> Self {
        Self::new(cfg.settle(), cfg.probe_interval())
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::from_timeouts(&TimeoutConfig::default())
    }
}

/// Polls until a TCP connection to `addr` succeeds
pub async fn wait_until_reachable(addr: SocketAddr, policy: ProbePolicy) -> Result<()> {
    let deadline = Instant::now() + policy.max_wait;
    let mut interval = policy.initial_interval.max(Duration::from_millis(1));
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Ok(Ok(_)) = timeout(remaining.max(interval), TcpStream::connect(addr)).await {
            debug!(%addr, attempts, "endpoint reachable");
            return Ok(());
        }

        if Instant::now() + interval > deadline {
            return Err(HarnessError::Startup(format!(
                "{addr} not reachable after {attempts} attempts within {:?}",
                policy.max_wait
            )));
        }
        sleep(interval).await;
        interval = policy.next_interval(interval);
    }
}

/// Polls until nothing accepts connections on `addr` any more
pub async fn wait_until_released(addr: SocketAddr, policy: ProbePolicy) -> Result<()> {
    let deadline = Instant::now() + policy.max_wait;
    let mut interval = policy.initial_interval.max(Duration::from_millis(1));
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        match timeout(interval, TcpStream::connect(addr)).await {
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!(%addr, attempts, "port released");
                return Ok(());
            }
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "release probe error");
            }
            Ok(Ok(stream)) => drop(stream),
            Err(_) => {}
        }

        if Instant::now() + interval > deadline {
            return Err(HarnessError::Io(std::io::Error::new(
                ErrorKind::TimedOut,
                format!("{addr} still accepting connections after {:?}", policy.max_wait),
            )));
        }
        sleep(interval).await;
        interval = policy.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = ProbePolicy::new(Duration::from_secs(1), Duration::from_millis(40));
        let second = policy.next_interval(policy.initial_interval);
        assert_eq!(second, Duration::from_millis(80));
        assert_eq!(policy.next_interval(second), MAX_PROBE_INTERVAL);
    }

    #[tokio::test]
    async fn test_reachable_listener() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        wait_until_reachable(addr, ProbePolicy::default()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_released_after_drop() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        wait_until_released(addr, ProbePolicy::default()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_fails_within_bound() {
        let addr = match std::net::TcpListener::bind("127.0.0.1:0").and_then(|l| l.local_addr()) {
            Ok(addr) => addr,
            Err(e) => panic!("bind failed: {e}"),
        };
        let policy = ProbePolicy::new(Duration::from_millis(50), Duration::from_millis(5));
        let result = wait_until_reachable(addr, policy).await;
        assert!(matches!(result, Err(HarnessError::Startup(_))));
    }
}
