//! Core types for trace operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::config::{
    DEFAULT_CORRELATION_WINDOW, DEFAULT_END_TTL, DEFAULT_QUERIES_PER_HOP, DEFAULT_START_TTL,
    DEFAULT_TIMEOUT,
};
use crate::TracerouteError;

/// An IPv4 address and port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    /// The all-zero endpoint, used before the OS has assigned one.
    pub const UNSPECIFIED: Endpoint = Endpoint::new(Ipv4Addr::UNSPECIFIED, 0);

    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Converts a socket address, rejecting IPv6.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(v4.into()),
            SocketAddr::V6(_) => None,
        }
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddrV4 {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddrV4::new(endpoint.addr, endpoint.port)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::V4(endpoint.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Classified state of a TCP connect probe once the wait is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// The handshake completed.
    Connected,
    /// Neither writability nor an error arrived before the timeout.
    TimedOut,
    /// The destination answered with a reset (ECONNREFUSED).
    PortClosed,
    /// The stack reported EHOSTUNREACH.
    HostUnreachable,
    /// Anything else, including local setup failures.
    Error,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketState::Connected => write!(f, "connected"),
            SocketState::TimedOut => write!(f, "timed_out"),
            SocketState::PortClosed => write!(f, "port_closed"),
            SocketState::HostUnreachable => write!(f, "host_unreachable"),
            SocketState::Error => write!(f, "error"),
        }
    }
}

/// Result of a single TCP probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// The TTL the probe was sent with.
    pub ttl: u8,
    /// Query index within the hop.
    pub query: u16,
    /// Local endpoint the OS assigned; the identity ICMP quotes echo back.
    pub local: Endpoint,
    /// Destination of the connect.
    pub remote: Endpoint,
    /// How the attempt ended.
    pub state: SocketState,
    /// Failure detail when `state` is `Error`.
    pub error: Option<String>,
    /// Time from connect to classification.
    pub elapsed: Duration,
}

/// What an ICMP notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A router dropped a probe whose TTL reached zero.
    TtlExceeded,
    /// The listener itself failed.
    Error,
}

/// A decoded ICMP message, or a listener failure, published by the listener.
#[derive(Debug, Clone)]
pub struct IcmpNotification {
    /// Local endpoint of the probe quoted inside the ICMP payload.
    pub origin: Endpoint,
    /// The router that sent the ICMP message.
    pub source: Endpoint,
    pub kind: NotificationKind,
    pub error: Option<String>,
    pub timestamp: Instant,
}

impl IcmpNotification {
    pub fn ttl_exceeded(origin: Endpoint, source: Endpoint) -> Self {
        Self {
            origin,
            source,
            kind: NotificationKind::TtlExceeded,
            error: None,
            timestamp: Instant::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            origin: Endpoint::UNSPECIFIED,
            source: Endpoint::UNSPECIFIED,
            kind: NotificationKind::Error,
            error: Some(message.into()),
            timestamp: Instant::now(),
        }
    }

    /// Returns true if this notification concerns the probe bound to `local`.
    ///
    /// Listener errors carry no probe identity and concern whichever probe
    /// is being correlated.
    pub fn concerns(&self, local: &Endpoint) -> bool {
        match self.kind {
            NotificationKind::TtlExceeded => self.origin == *local,
            NotificationKind::Error => true,
        }
    }
}

/// Kind of an externally visible trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    Started,
    ProbeTimedOut,
    HopReached,
    Connected,
    RemoteClosed,
    Completed,
    Failed,
    Aborted,
}

impl TraceEventKind {
    /// Returns true for the markers that end an event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TraceEventKind::Completed | TraceEventKind::Failed | TraceEventKind::Aborted
        )
    }
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceEventKind::Started => "Started",
            TraceEventKind::ProbeTimedOut => "ProbeTimedOut",
            TraceEventKind::HopReached => "HopReached",
            TraceEventKind::Connected => "Connected",
            TraceEventKind::RemoteClosed => "RemoteClosed",
            TraceEventKind::Completed => "Completed",
            TraceEventKind::Failed => "Failed",
            TraceEventKind::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// One unit of the trace event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    /// TTL of the probe; 0 for Started and Completed.
    pub hop: u8,
    pub query: u16,
    pub remote_addr: Option<Ipv4Addr>,
    pub rtt: Option<Duration>,
    pub error: Option<String>,
}

impl TraceEvent {
    /// Creates an event with no hop information.
    pub fn marker(kind: TraceEventKind) -> Self {
        Self {
            kind,
            hop: 0,
            query: 0,
            remote_addr: None,
            rtt: None,
            error: None,
        }
    }

    /// Creates an event for the probe at (`hop`, `query`).
    pub fn for_probe(kind: TraceEventKind, hop: u8, query: u16) -> Self {
        Self {
            hop,
            query,
            ..Self::marker(kind)
        }
    }

    pub fn with_remote(mut self, addr: Ipv4Addr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TraceEvent{{kind: {}, hop: {}, query: {}, addr: {:?}, rtt: {:?}, err: {:?}}}",
            self.kind, self.hop, self.query, self.remote_addr, self.rtt, self.error
        )
    }
}

/// Parameters for a single trace.
#[derive(Debug, Clone)]
pub struct TraceParams {
    /// Address and port the probes connect to.
    pub destination: Endpoint,
    /// First TTL probed.
    pub start_ttl: u8,
    /// Last TTL probed, inclusive.
    pub end_ttl: u8,
    /// Probes sent per TTL.
    pub queries_per_hop: u16,
    /// Readiness wait per probe.
    pub timeout: Duration,
    /// How long to wait for a matching ICMP notification after each probe.
    pub correlation_window: Duration,
}

impl TraceParams {
    pub fn new(destination: Endpoint) -> Self {
        Self {
            destination,
            start_ttl: DEFAULT_START_TTL,
            end_ttl: DEFAULT_END_TTL,
            queries_per_hop: DEFAULT_QUERIES_PER_HOP,
            timeout: DEFAULT_TIMEOUT,
            correlation_window: DEFAULT_CORRELATION_WINDOW,
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), TracerouteError> {
        if self.start_ttl == 0 || self.start_ttl > self.end_ttl {
            return Err(TracerouteError::InvalidTtlRange {
                start_ttl: self.start_ttl,
                end_ttl: self.end_ttl,
            });
        }
        if self.queries_per_hop == 0 {
            return Err(TracerouteError::InvalidQueryCount(self.queries_per_hop));
        }
        Ok(())
    }
}
