use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::debug;

use crate::error::{HarnessError, Result};

/// Default number of bind attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: usize = 64;

/// Hands out free local TCP ports, never the same one twice.
///
/// A port is found by binding `127.0.0.1:0` and releasing the socket again, so
/// another process may still grab it before the caller binds. Ports already
/// issued by this allocator are rejected, which keeps concurrent sessions in the
/// same process (and consecutive sessions of one test run) on disjoint ports.
pub struct PortAllocator {
    issued: Mutex<HashSet<u16>>,
    max_attempts: usize,
}

impl PortAllocator {
    pub fn new(max_attempts: usize) -> Self {
        Self { issued: Mutex::new(HashSet::new()), max_attempts }
    }

    /// Process-wide allocator used by sessions
    pub fn global() -> &'static PortAllocator {
        static GLOBAL: OnceLock<PortAllocator> = OnceLock::new();
        GLOBAL.get_or_init(|| PortAllocator::new(DEFAULT_MAX_ATTEMPTS))
    }

    pub fn allocate(&self) -> Result<u16> {
        for attempt in 1..=self.max_attempts {
            let port = match probe_free_port() {
                Ok(port) => port,
                Err(e) => {
                    debug!(attempt, error = %e, "port probe failed");
                    continue;
                }
            };

            let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
            if issued.insert(port) {
                debug!(port, attempt, "allocated port");
                return Ok(port);
            }
        }
        Err(HarnessError::ResourceExhausted { attempts: self.max_attempts })
    }

    /// Two distinct ports, typically plaintext and TLS listeners
    pub fn allocate_pair(&self) -> Result<(u16, u16)> {
        Ok((self.allocate()?, self.allocate()?))
    }

    /// Marks a port as taken without probing it (fixed ports from configuration)
    pub fn reserve(&self, port: u16) -> bool {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).insert(port)
    }

    pub fn is_issued(&self, port: u16) -> bool {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).contains(&port)
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Allocates a port from the process-wide allocator
pub fn allocate() -> Result<u16> {
    PortAllocator::global().allocate()
}

fn probe_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_blocks_reissue() {
        let allocator = PortAllocator::new(4);
        assert!(allocator.reserve(40_000));
        assert!(!allocator.reserve(40_000));
        assert!(allocator.is_issued(40_000));
        assert_eq!(allocator.issued_count(), 1);
    }

    #[test]
    fn test_zero_attempts_is_exhausted() {
        let allocator = PortAllocator::new(0);
        match allocator.allocate() {
            Err(HarnessError::ResourceExhausted { attempts }) => assert_eq!(attempts, 0),
            other => panic!("expected ResourceExhausted, got {other:?}"),
        }
    }
}
