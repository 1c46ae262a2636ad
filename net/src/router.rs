//! Per-host round-robin address planning.
//!
//! All addresses of a host are resolved once per run and handed out
//! in rotation.  An address that failed is marked in-error and skipped
//! until every address of that host has failed, at which point the
//! marks reset and rotation starts over.  This yields N-try failover
//! per host without any global state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Mutex;

use tracing::debug;

use crate::NetError;

#[derive(Debug)]
struct HostState {
    addrs: Vec<IpAddr>,
    /// Monotonically advancing rotation index.
    next: usize,
    in_error: Vec<bool>,
}

/// Round-robin planner over the resolved addresses of each host.
#[derive(Debug, Default)]
pub struct RoundRobinRouter {
    hosts: Mutex<HashMap<String, HostState>>,
}

impl RoundRobinRouter {
    pub fn new() -> Self {
        RoundRobinRouter::default()
    }

    /// Number of addresses `host` resolves to (resolving on first use).
    pub fn address_count(&self, host: &str) -> Result<usize, NetError> {
        let mut hosts = self.hosts.lock().unwrap();
        Ok(Self::state_for(&mut hosts, host)?.addrs.len())
    }

    /// The next address to try for `host`, skipping in-error ones.
    pub fn next_address(&self, host: &str, port: u16) -> Result<SocketAddr, NetError> {
        let mut hosts = self.hosts.lock().unwrap();
        let state = Self::state_for(&mut hosts, host)?;

        if state.in_error.iter().all(|failed| *failed) {
            debug!(host, "all addresses failed; resetting error marks");
            state.in_error.fill(false);
        }
        let len = state.addrs.len();
        for _ in 0..len {
            let idx = state.next % len;
            state.next = state.next.wrapping_add(1);
            if !state.in_error[idx] {
                return Ok(SocketAddr::new(state.addrs[idx], port));
            }
        }
        unreachable!("error marks were just reset");
    }

    /// Marks an address of `host` as failed.
    pub fn mark_error(&self, host: &str, addr: IpAddr) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(state) = hosts.get_mut(host) {
            if let Some(idx) = state.addrs.iter().position(|a| *a == addr) {
                debug!(host, %addr, "marking address in error");
                state.in_error[idx] = true;
            }
        }
    }

    fn state_for<'a>(
        hosts: &'a mut HashMap<String, HostState>,
        host: &str,
    ) -> Result<&'a mut HostState, NetError> {
        match hosts.entry(host.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let addrs = resolve(host)?;
                debug!(host, count = addrs.len(), "resolved key server host");
                Ok(vacant.insert(HostState {
                    in_error: vec![false; addrs.len()],
                    addrs,
                    next: 0,
                }))
            }
        }
    }

    /// Installs addresses without resolving, for tests.
    #[cfg(test)]
    pub(crate) fn seed(&self, host: &str, addrs: Vec<IpAddr>) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.insert(
            host.to_string(),
            HostState {
                in_error: vec![false; addrs.len()],
                addrs,
                next: 0,
            },
        );
    }
}

fn resolve(host: &str) -> Result<Vec<IpAddr>, NetError> {
    let addrs: Vec<IpAddr> = (host, 0u16)
        .to_socket_addrs()
        .map_err(|source| NetError::Resolve {
            host: host.to_string(),
            source,
        })?
        .map(|sa| sa.ip())
        .collect();
    if addrs.is_empty() {
        return Err(NetError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        });
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn rotates_addresses() {
        let router = RoundRobinRouter::new();
        router.seed("ks.example", vec![ip(1), ip(2), ip(3)]);

        let picks: Vec<IpAddr> = (0..6)
            .map(|_| router.next_address("ks.example", 11371).unwrap().ip())
            .collect();
        assert_eq!(picks, vec![ip(1), ip(2), ip(3), ip(1), ip(2), ip(3)]);
    }

    #[test]
    fn skips_marked_addresses() {
        let router = RoundRobinRouter::new();
        router.seed("ks.example", vec![ip(1), ip(2)]);

        assert_eq!(router.next_address("ks.example", 80).unwrap().ip(), ip(1));
        router.mark_error("ks.example", ip(2));
        // ip(2) would be next but is in error.
        assert_eq!(router.next_address("ks.example", 80).unwrap().ip(), ip(1));
    }

    #[test]
    fn resets_after_all_failed() {
        let router = RoundRobinRouter::new();
        router.seed("ks.example", vec![ip(1), ip(2)]);
        router.mark_error("ks.example", ip(1));
        router.mark_error("ks.example", ip(2));

        // Both failed: marks reset, rotation continues.
        assert!(router.next_address("ks.example", 80).is_ok());
    }

    #[test]
    fn resolves_literal_addresses() {
        let router = RoundRobinRouter::new();
        assert_eq!(router.address_count("127.0.0.1").unwrap(), 1);
        let addr = router.next_address("127.0.0.1", 4711).unwrap();
        assert_eq!(addr.port(), 4711);
    }

    #[test]
    fn ports_do_not_disturb_rotation() {
        let router = RoundRobinRouter::new();
        router.seed("ks.example", vec![ip(1), ip(2)]);
        assert_eq!(router.next_address("ks.example", 80).unwrap().ip(), ip(1));
        assert_eq!(router.next_address("ks.example", 443).unwrap().ip(), ip(2));
    }
}
