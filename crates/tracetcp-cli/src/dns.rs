//! Forward resolution of the destination and reverse lookups for display.

use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr};
use tracetcp_core::TracerouteError;
use tracing::{debug, warn};

/// Resolves a hostname to its first IPv4 address. IPv4 literals skip DNS.
pub async fn resolve_ipv4(hostname: &str) -> Result<Ipv4Addr, TracerouteError> {
    if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let failed = |reason: String| TracerouteError::DnsResolutionFailed {
        hostname: hostname.to_string(),
        reason,
    };
    let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| failed(e.to_string()))?;
    let lookup = resolver
        .lookup_ip(hostname)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let ip = lookup
        .iter()
        .find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| failed("no IPv4 address".to_string()))?;
    debug!(hostname, %ip, "Resolved destination");
    Ok(ip)
}

/// PTR lookups for hop addresses.
pub struct ReverseResolver {
    resolver: TokioAsyncResolver,
}

impl ReverseResolver {
    /// Builds a resolver from the system configuration, or `None` if that fails.
    pub fn from_system_conf() -> Option<Self> {
        match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(Self { resolver }),
            Err(e) => {
                warn!("Failed to create DNS resolver for reverse lookup: {}", e);
                None
            }
        }
    }

    /// First PTR name for `ip`, without the trailing dot.
    pub async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let names = self.resolver.reverse_lookup(IpAddr::V4(ip)).await.ok()?;
        let name = names.iter().next()?.to_string();
        Some(trim_root(&name).to_string())
    }
}

fn trim_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}
