//! Socket addresses for probe connects.

use socket2::SockAddr;
use std::net::SocketAddr;
use tracetcp_core::Endpoint;

/// Builds the address a probe socket connects to.
pub fn build_probe_target(endpoint: Endpoint) -> SockAddr {
    SockAddr::from(SocketAddr::from(endpoint))
}
