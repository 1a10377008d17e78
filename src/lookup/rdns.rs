use anyhow::Result;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::lookup::sanitize_display;

/// Upper bound on the single PTR lookup done before the run starts
pub const RDNS_TIMEOUT: Duration = Duration::from_secs(2);

/// Reverse DNS lookup for the target address
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsLookup {
    pub fn new() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Ok(Self {
            resolver,
            timeout: RDNS_TIMEOUT,
        })
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// PTR name for `ip`, or None on failure or timeout
    pub async fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(IpAddr::V4(ip)));

        match lookup.await {
            Ok(Ok(names)) => names.iter().next().map(|name| {
                let s = name.to_string();
                // Remove trailing dot
                sanitize_display(s.trim_end_matches('.'))
            }),
            Ok(Err(e)) => {
                log::debug!("reverse lookup of {} failed: {}", ip, e);
                None
            }
            Err(_) => {
                log::debug!("reverse lookup of {} timed out", ip);
                None
            }
        }
    }
}
