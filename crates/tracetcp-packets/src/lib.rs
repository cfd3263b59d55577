//! Wire decoding and ICMP capture for tracetcp.
//!
//! - [`decode_icmp_ttl_exceeded`] recovers the probe quoted in a TTL
//!   exceeded message
//! - [`RawIcmpListener`] reads a raw ICMP socket for the lifetime of a trace
//! - [`build_probe_target`] builds connect addresses for probes

pub mod addr;
pub mod listener;
pub mod parser;

pub use addr::build_probe_target;
pub use listener::RawIcmpListener;
pub use parser::{decode_icmp_ttl_exceeded, parse_tcp_first_bytes, Decoded, EmbeddedProbe, TcpPorts};
