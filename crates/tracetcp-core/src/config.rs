//! Defaults and string parsing shared by the binaries.

use std::time::Duration;

use crate::TracerouteError;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_START_TTL: u8 = 1;
pub const DEFAULT_END_TTL: u8 = 30;
pub const DEFAULT_QUERIES_PER_HOP: u16 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_CORRELATION_WINDOW: Duration = Duration::from_millis(100);

/// Well-known TCP services accepted in place of a port number.
const SERVICES: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
    ("submission", 587),
    ("imaps", 993),
    ("pop3s", 995),
    ("mysql", 3306),
    ("postgresql", 5432),
];

/// Looks up a port number or a well-known service name.
pub fn lookup_port(value: &str) -> Option<u16> {
    if let Ok(port) = value.parse::<u16>() {
        return Some(port);
    }
    let lower = value.to_ascii_lowercase();
    SERVICES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, port)| *port)
}

/// Splits "host", "host:port" or "host:service" into its parts.
pub fn split_host_and_port(
    value: &str,
    default_port: u16,
) -> Result<(String, u16), TracerouteError> {
    let mut parts = value.split(':');
    let host = parts.next().unwrap_or_default();
    let port = parts.next();
    if host.is_empty() || parts.next().is_some() {
        return Err(TracerouteError::InvalidTarget(format!(
            "{value}: malformed host and port"
        )));
    }

    let port = match port {
        None => default_port,
        Some(p) => lookup_port(p)
            .ok_or_else(|| TracerouteError::InvalidTarget(format!("{value}: unknown port {p}")))?,
    };
    Ok((host.to_string(), port))
}

/// Parses durations like "1s", "250ms" or "1m30s".
pub fn parse_duration(value: &str) -> Result<Duration, TracerouteError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| TracerouteError::InvalidDuration(format!("{value}: {e}")))
}

/// Formats a duration so that `parse_duration` reads it back.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
