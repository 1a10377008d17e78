use anyhow::{Result, anyhow};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::state::TargetInfo;

/// Resolve a host string to its first IPv4 address
pub fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    // Try parsing as IP address first
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = format!("{}:0", host)
        .to_socket_addrs()
        .map_err(|e| {
            log::debug!("resolution of {} failed: {}", host, e);
            anyhow!("unknown host")
        })?;

    addrs
        .map(|s| s.ip())
        .find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow!("unknown host"))
}

/// Build the run's target from a host string
pub fn resolve_target(host: &str) -> Result<TargetInfo> {
    let resolved = resolve_ipv4(host)?;
    log::debug!("resolved {} to {}", host, resolved);
    Ok(TargetInfo::new(host.to_string(), resolved))
}
