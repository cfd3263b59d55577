//! Kernel TCP connect probes.
//!
//! Each probe is an ordinary non-blocking connect on a fresh socket with
//! IP_TTL lowered. The kernel builds the SYN; routers that drop it answer
//! over ICMP, which the listener picks up separately.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracetcp_core::{Endpoint, ProbeExecutor, ProbeOutcome, SocketState, TracerouteError};
use tracetcp_packets::build_probe_target;
use tracing::{debug, trace};

/// How the readiness wait ended.
enum Readiness {
    /// Writable, or connect failed synchronously; carries SO_ERROR if set.
    Settled(Option<io::Error>),
    TimedOut,
}

/// Probes with one kernel TCP socket per call.
#[derive(Debug, Clone, Default)]
pub struct ConnectProber;

impl ConnectProber {
    pub fn new() -> Self {
        Self
    }

    async fn connect_with_ttl(
        &self,
        destination: Endpoint,
        ttl: u8,
        timeout: Duration,
        local: &mut Endpoint,
    ) -> Result<Readiness, TracerouteError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TracerouteError::SocketCreation)?;
        socket
            .set_ttl(u32::from(ttl))
            .map_err(|source| TracerouteError::SocketOption {
                option: "IP_TTL",
                source,
            })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| TracerouteError::SocketOption {
                option: "O_NONBLOCK",
                source,
            })?;

        match socket.connect(&build_probe_target(destination)) {
            Ok(()) => {
                *local = local_endpoint(&socket)?;
                return Ok(Readiness::Settled(None));
            }
            Err(e) if is_in_progress(&e) => {}
            Err(e) => {
                if let Ok(ep) = local_endpoint(&socket) {
                    *local = ep;
                }
                return Ok(Readiness::Settled(Some(e)));
            }
        }
        *local = local_endpoint(&socket)?;
        trace!(ttl, local = %local, "Connect in progress");

        let stream = TcpStream::from_std(socket.into()).map_err(TracerouteError::ReadinessWait)?;
        match tokio::time::timeout(timeout, stream.writable()).await {
            Err(_) => Ok(Readiness::TimedOut),
            Ok(Err(e)) => Err(TracerouteError::ReadinessWait(e)),
            Ok(Ok(())) => {
                let error = stream.take_error().map_err(TracerouteError::ReadinessWait)?;
                Ok(Readiness::Settled(error))
            }
        }
    }
}

#[async_trait]
impl ProbeExecutor for ConnectProber {
    async fn probe(
        &self,
        destination: Endpoint,
        ttl: u8,
        query: u16,
        timeout: Duration,
    ) -> ProbeOutcome {
        let started = Instant::now();
        let mut local = Endpoint::UNSPECIFIED;
        let (state, error) = match self
            .connect_with_ttl(destination, ttl, timeout, &mut local)
            .await
        {
            Ok(Readiness::TimedOut) => (SocketState::TimedOut, None),
            Ok(Readiness::Settled(e)) => classify(e.as_ref()),
            Err(e) => (SocketState::Error, Some(e.to_string())),
        };
        let elapsed = started.elapsed();

        debug!(
            ttl,
            query,
            local = %local,
            state = %state,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Probe finished"
        );
        ProbeOutcome {
            ttl,
            query,
            local,
            remote: destination,
            state,
            error,
            elapsed,
        }
    }
}

/// Maps a pending socket error (SO_ERROR) to a probe state.
pub fn classify(error: Option<&io::Error>) -> (SocketState, Option<String>) {
    let Some(e) = error else {
        return (SocketState::Connected, None);
    };
    match e.raw_os_error() {
        Some(libc::ECONNREFUSED) => (SocketState::PortClosed, None),
        Some(libc::EHOSTUNREACH) => (SocketState::HostUnreachable, None),
        _ => (SocketState::Error, Some(e.to_string())),
    }
}

fn is_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

fn local_endpoint(socket: &Socket) -> Result<Endpoint, TracerouteError> {
    let addr = socket.local_addr().map_err(TracerouteError::LocalEndpoint)?;
    addr.as_socket()
        .and_then(Endpoint::from_socket_addr)
        .ok_or_else(|| TracerouteError::Internal("probe socket has no IPv4 local address".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn test_classify() {
        assert_eq!(classify(None), (SocketState::Connected, None));

        let refused = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert_eq!(classify(Some(&refused)), (SocketState::PortClosed, None));

        let unreachable = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        assert_eq!(
            classify(Some(&unreachable)),
            (SocketState::HostUnreachable, None)
        );

        let other = io::Error::from_raw_os_error(libc::ENETUNREACH);
        let (state, error) = classify(Some(&other));
        assert_eq!(state, SocketState::Error);
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_probe_connects_to_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let destination = Endpoint::new(Ipv4Addr::LOCALHOST, port);

        let outcome = ConnectProber::new()
            .probe(destination, 64, 2, Duration::from_secs(1))
            .await;
        assert_eq!(outcome.state, SocketState::Connected);
        assert_eq!((outcome.ttl, outcome.query), (64, 2));
        assert_eq!(outcome.remote, destination);
        assert_eq!(outcome.local.addr, Ipv4Addr::LOCALHOST);
        assert_ne!(outcome.local.port, 0);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_reports_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let destination = Endpoint::new(Ipv4Addr::LOCALHOST, port);

        let outcome = ConnectProber::new()
            .probe(destination, 64, 0, Duration::from_secs(1))
            .await;
        assert_eq!(outcome.state, SocketState::PortClosed);
    }

    #[tokio::test]
    async fn test_each_probe_uses_new_local_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = Endpoint::new(Ipv4Addr::LOCALHOST, listener.local_addr().unwrap().port());
        let prober = ConnectProber::new();

        let a = prober.probe(destination, 64, 0, Duration::from_secs(1)).await;
        let b = prober.probe(destination, 64, 1, Duration::from_secs(1)).await;
        assert_ne!(a.local, b.local);
    }

    /// Needs a default route; TEST-NET-1 addresses are never answered.
    #[tokio::test]
    #[ignore]
    async fn test_probe_times_out_before_path_rtt() {
        let destination = Endpoint::new(Ipv4Addr::new(192, 0, 2, 1), 80);
        let outcome = ConnectProber::new()
            .probe(destination, 64, 0, Duration::from_millis(50))
            .await;
        assert_eq!(outcome.state, SocketState::TimedOut);
        assert!(outcome.elapsed >= Duration::from_millis(50));
        assert_ne!(outcome.local.port, 0);
    }
}
