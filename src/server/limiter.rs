use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Error type for per-IP admission
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("too many connections from {ip}: limit {max}")]
    TooManyConnections { ip: std::net::Ipv4Addr, max: usize },
}

/// Counts live client connections per IPv4 source address
///
/// Addresses that cannot be expressed as IPv4 are not counted.
pub struct PerIpLimiter {
    max_per_ip: usize,
    counts: Mutex<HashMap<u32, usize>>,
}

impl PerIpLimiter {
    /// Create a limiter; `max_per_ip == 0` admits everything
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            max_per_ip,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_per_ip(&self) -> usize {
        self.max_per_ip
    }

    /// Increment the counter for `ip` and return the new count
    pub fn register(&self, ip: u32) -> usize {
        let mut counts = self.counts.lock();
        let n = counts.entry(ip).or_insert(0);
        *n += 1;
        *n
    }

    /// Decrement the counter for `ip`
    ///
    /// # Panics
    /// If `ip` was never registered or its count is already zero. Either
    /// means the connection bookkeeping is broken.
    pub fn unregister(&self, ip: u32) {
        let mut counts = self.counts.lock();
        match counts.get_mut(&ip) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                counts.remove(&ip);
            }
            None => {
                drop(counts);
                panic!("BUG: unregister for ip={ip} without a matching register");
            }
        }
    }

    /// Current count for `ip`
    pub fn count(&self, ip: u32) -> usize {
        self.counts.lock().get(&ip).copied().unwrap_or(0)
    }

    /// Admit a connection from `peer`
    ///
    /// The returned guard holds the registration until it is dropped.
    pub fn acquire(self: &Arc<Self>, peer: &SocketAddr) -> Result<PerIpGuard, LimitError> {
        let ip = ipv4_to_u32(peer);
        if self.max_per_ip == 0 || ip == 0 {
            return Ok(PerIpGuard { limiter: None, ip });
        }

        let n = self.register(ip);
        if n > self.max_per_ip {
            self.unregister(ip);
            return Err(LimitError::TooManyConnections {
                ip: ip.into(),
                max: self.max_per_ip,
            });
        }

        debug!(peer = %peer, count = n, "Registered client address");
        Ok(PerIpGuard {
            limiter: Some(self.clone()),
            ip,
        })
    }
}

/// Keeps one per-IP registration alive
pub struct PerIpGuard {
    limiter: Option<Arc<PerIpLimiter>>,
    ip: u32,
}

impl PerIpGuard {
    pub fn ip(&self) -> u32 {
        self.ip
    }
}

impl Drop for PerIpGuard {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            limiter.unregister(self.ip);
        }
    }
}

/// Numeric IPv4 address of `addr`, 0 when there is none
pub fn ipv4_to_u32(addr: &SocketAddr) -> u32 {
    let v4 = match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    v4.map(u32::from).unwrap_or(0)
}
