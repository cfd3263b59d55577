//! Error types for trace operations.

use thiserror::Error;

/// Main error type for trace operations.
#[derive(Error, Debug)]
pub enum TracerouteError {
    // Socket/IO errors
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read local endpoint: {0}")]
    LocalEndpoint(#[source] std::io::Error),

    #[error("Readiness wait failed: {0}")]
    ReadinessWait(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    // Packet errors
    #[error("{layer} header too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to parse {layer} layer: {reason}")]
    PacketParseFailed { layer: &'static str, reason: String },

    // Configuration errors
    #[error("Invalid TTL range: start={start_ttl}, end={end_ttl}")]
    InvalidTtlRange { start_ttl: u8, end_ttl: u8 },

    #[error("Invalid query count: {0}")]
    InvalidQueryCount(u16),

    #[error("Invalid target {0}")]
    InvalidTarget(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    // DNS errors
    #[error("Failed to resolve hostname {hostname}: {reason}")]
    DnsResolutionFailed { hostname: String, reason: String },

    // Session errors
    #[error("Trace already in progress")]
    TraceInProgress,

    // Internal errors
    #[error("Correlation invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TracerouteError {
    /// Returns true if this error came from decoding an inbound packet.
    ///
    /// A raw ICMP socket sees every ICMP datagram addressed to the host, so
    /// undecodable input is expected and must not end a trace.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. } | Self::PacketParseFailed { .. }
        )
    }
}

/// Result type alias for trace operations.
pub type TracerouteResult<T> = Result<T, TracerouteError>;
