//! Connectivity probing: does the monitored interface have a usable
//! address, and failing that, can we reach the outside at all?
//!
//! A probe that cannot get a conclusive answer returns an error and the
//! tracker keeps the previous state, so one OS hiccup never flips the
//! supervisor.

use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use sysinfo::Networks;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Online(IpAddr),
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online(_))
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("reachability check failed inconclusively: {0}")]
    Reachability(#[source] std::io::Error),
}

pub struct Prober {
    iface: String,
    networks: Networks,
    probe_addr: SocketAddr,
    probe_timeout: Duration,
}

impl Prober {
    pub fn new(iface: String, probe_addr: SocketAddr, probe_timeout: Duration) -> Self {
        Self {
            iface,
            networks: Networks::new_with_refreshed_list(),
            probe_addr,
            probe_timeout,
        }
    }

    /// One connectivity check. `Ok` is conclusive, `Err` means the
    /// caller should keep its previous answer.
    pub fn probe(&mut self) -> Result<Connectivity, ProbeError> {
        // Strategy 1: the interface address table.
        if let Some(ip) = self.interface_address() {
            return Ok(Connectivity::Online(ip));
        }

        // Strategy 2: no address on the interface — confirm we are
        // really cut off by attempting an external TCP connect.
        match TcpStream::connect_timeout(&self.probe_addr, self.probe_timeout) {
            Ok(stream) => {
                let ip = stream
                    .local_addr()
                    .map(|a| a.ip())
                    .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
                debug!(%ip, "interface bare but external host reachable");
                Ok(Connectivity::Online(ip))
            }
            Err(err) if conclusive_unreachable(&err) => Ok(Connectivity::Offline),
            Err(err) => Err(ProbeError::Reachability(err)),
        }
    }

    fn interface_address(&mut self) -> Option<IpAddr> {
        self.networks.refresh(true);
        let data = self
            .networks
            .iter()
            .find(|(name, _)| name.as_str() == self.iface)
            .map(|(_, data)| data)?;

        let mut candidates: Vec<IpAddr> =
            data.ip_networks().iter().map(|n| n.addr).filter(is_usable_addr).collect();
        // prefer IPv4, matching what subscribers will dial
        candidates.sort_by_key(|ip| ip.is_ipv6());
        candidates.into_iter().next()
    }
}

/// An address that actually means "connected": not loopback, not a
/// link-local/APIPA self-assignment.
pub fn is_usable_addr(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            !v6.is_loopback()
                && !v6.is_unspecified()
                && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

fn conclusive_unreachable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::ConnectionRefused
    ) || matches!(
        err.raw_os_error(),
        Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH)
    )
}

/// Collapses a probe result stream into the current connectivity state.
/// State changes only on conclusive reads.
pub struct ConnectivityTracker {
    state: Connectivity,
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self {
            state: Connectivity::Offline,
        }
    }

    pub fn observe(&mut self, result: Result<Connectivity, ProbeError>) -> &Connectivity {
        match result {
            Ok(state) => self.state = state,
            Err(err) => debug!(%err, "inconclusive probe, keeping previous state"),
        }
        &self.state
    }

    pub fn state(&self) -> &Connectivity {
        &self.state
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn io_err() -> ProbeError {
        ProbeError::Reachability(std::io::Error::other("probe exploded"))
    }

    fn online(last: u8) -> Connectivity {
        Connectivity::Online(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last)))
    }

    #[test]
    fn usable_addr_filters_loopback_and_link_local() {
        assert!(is_usable_addr(&"192.168.1.100".parse().unwrap()));
        assert!(is_usable_addr(&"10.0.0.1".parse().unwrap()));
        assert!(!is_usable_addr(&"127.0.0.1".parse().unwrap()));
        assert!(!is_usable_addr(&"169.254.1.1".parse().unwrap()));
        assert!(!is_usable_addr(&"0.0.0.0".parse().unwrap()));
        assert!(!is_usable_addr(&"::1".parse().unwrap()));
        assert!(!is_usable_addr(&"fe80::1".parse().unwrap()));
        assert!(is_usable_addr(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn tracker_changes_state_only_on_conclusive_reads() {
        let mut tracker = ConnectivityTracker::new();
        assert_eq!(tracker.state(), &Connectivity::Offline);

        // fail, fail, success(online), fail, success(offline)
        assert_eq!(tracker.observe(Err(io_err())), &Connectivity::Offline);
        assert_eq!(tracker.observe(Err(io_err())), &Connectivity::Offline);
        assert_eq!(tracker.observe(Ok(online(7))), &online(7));
        assert_eq!(tracker.observe(Err(io_err())), &online(7));
        assert_eq!(
            tracker.observe(Ok(Connectivity::Offline)),
            &Connectivity::Offline
        );
    }

    #[test]
    fn tracker_keeps_latest_address() {
        let mut tracker = ConnectivityTracker::new();
        tracker.observe(Ok(online(7)));
        tracker.observe(Ok(online(8)));
        assert_eq!(tracker.state(), &online(8));
    }
}
