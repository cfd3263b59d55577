//! ICMP "TTL exceeded" decoding using pnet_packet.
//!
//! A router that drops a probe quotes the probe's IPv4 header and at least the
//! first 8 bytes of its TCP header. Those 8 bytes carry the ports, so the
//! quote identifies the local endpoint the probe was sent from.

use pnet_packet::icmp::time_exceeded::IcmpCodes;
use pnet_packet::icmp::{IcmpPacket, IcmpTypes};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use std::net::Ipv4Addr;
use tracetcp_core::{Endpoint, TracerouteError};

/// Minimum IPv4 header length in bytes.
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// ICMP header length for error messages (type, code, checksum, unused).
pub const ICMP_HEADER_LEN: usize = 8;
/// Bytes of the TCP header an ICMP error is guaranteed to quote.
pub const TCP_QUOTE_LEN: usize = 8;

/// The probe quoted inside a TTL exceeded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedProbe {
    /// Source address and port of the dropped probe.
    pub origin: Endpoint,
    /// Where the dropped probe was headed.
    pub destination: Endpoint,
    /// The router that sent the ICMP message.
    pub responder: Ipv4Addr,
}

/// Outcome of decoding one inbound ICMP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    TtlExceeded(EmbeddedProbe),
    /// Well-formed, but not a TTL exceeded message quoting a TCP segment.
    NotRelevant,
}

/// Ports from the first 8 bytes of a quoted TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpPorts {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Parse the ports from the first 8 bytes of a TCP header.
pub fn parse_tcp_first_bytes(buf: &[u8]) -> Result<TcpPorts, TracerouteError> {
    if buf.len() < TCP_QUOTE_LEN {
        return Err(TracerouteError::PacketTooShort {
            layer: "TCP",
            expected: TCP_QUOTE_LEN,
            actual: buf.len(),
        });
    }

    Ok(TcpPorts {
        src_port: u16::from_be_bytes([buf[0], buf[1]]),
        dst_port: u16::from_be_bytes([buf[2], buf[3]]),
    })
}

/// Splits an IPv4 packet into its header and payload, honoring IHL.
fn split_ipv4<'a>(
    buf: &'a [u8],
    layer: &'static str,
) -> Result<(Ipv4Packet<'a>, &'a [u8]), TracerouteError> {
    let header = Ipv4Packet::new(buf).ok_or(TracerouteError::PacketTooShort {
        layer,
        expected: IPV4_MIN_HEADER_LEN,
        actual: buf.len(),
    })?;

    if header.get_version() != 4 {
        return Err(TracerouteError::PacketParseFailed {
            layer,
            reason: format!("unexpected IP version {}", header.get_version()),
        });
    }

    let header_len = header.get_header_length() as usize * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(TracerouteError::PacketParseFailed {
            layer,
            reason: format!("header length {header_len} below minimum"),
        });
    }
    if buf.len() < header_len {
        return Err(TracerouteError::PacketTooShort {
            layer,
            expected: header_len,
            actual: buf.len(),
        });
    }

    Ok((header, &buf[header_len..]))
}

/// Decodes a datagram read from a raw ICMPv4 socket, outer IP header included.
pub fn decode_icmp_ttl_exceeded(buf: &[u8]) -> Result<Decoded, TracerouteError> {
    let (outer, icmp) = split_ipv4(buf, "IPv4")?;
    if outer.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return Ok(Decoded::NotRelevant);
    }

    if icmp.len() < ICMP_HEADER_LEN {
        return Err(TracerouteError::PacketTooShort {
            layer: "ICMP",
            expected: ICMP_HEADER_LEN,
            actual: icmp.len(),
        });
    }
    let header = IcmpPacket::new(icmp).ok_or(TracerouteError::PacketTooShort {
        layer: "ICMP",
        expected: ICMP_HEADER_LEN,
        actual: icmp.len(),
    })?;
    if header.get_icmp_type() != IcmpTypes::TimeExceeded
        || header.get_icmp_code() != IcmpCodes::TimeToLiveExceededInTransit
    {
        return Ok(Decoded::NotRelevant);
    }

    let (inner, tcp) = split_ipv4(&icmp[ICMP_HEADER_LEN..], "quoted IPv4")?;
    if inner.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return Ok(Decoded::NotRelevant);
    }
    let ports = parse_tcp_first_bytes(tcp)?;

    Ok(Decoded::TtlExceeded(EmbeddedProbe {
        origin: Endpoint::new(inner.get_source(), ports.src_port),
        destination: Endpoint::new(inner.get_destination(), ports.dst_port),
        responder: outer.get_source(),
    }))
}
