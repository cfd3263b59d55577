//! Raw ICMP capture.
//!
//! The socket is opened before `spawn` returns, so replies to the first probe
//! are already queued on it. Receiving runs on the blocking pool for the
//! lifetime of one trace, publishing the TTL exceeded datagrams.

use crate::parser::{decode_icmp_ttl_exceeded, Decoded};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracetcp_core::{Endpoint, IcmpNotification, ListenerHandle, NotificationListener, TracerouteError};
use tracing::{debug, error, trace, warn};

/// Longest time a blocked receive delays shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const RECV_BUFFER_LEN: usize = 1500;

/// Notification source backed by a raw ICMPv4 socket. Requires root or
/// CAP_NET_RAW; without it the listener reports a single error notification.
#[derive(Debug, Clone)]
pub struct RawIcmpListener {
    poll_interval: Duration,
}

impl RawIcmpListener {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for RawIcmpListener {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationListener for RawIcmpListener {
    fn spawn(&self) -> ListenerHandle {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let socket = open_socket(self.poll_interval);
        let task = tokio::task::spawn_blocking(move || run_blocking(socket, &token, &tx));
        ListenerHandle::new(rx, cancel, Some(task))
    }
}

fn open_socket(poll_interval: Duration) -> Result<Socket, TracerouteError> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
        .map_err(TracerouteError::SocketCreation)?;
    socket
        .set_read_timeout(Some(poll_interval))
        .map_err(|source| TracerouteError::SocketOption {
            option: "SO_RCVTIMEO",
            source,
        })?;
    Ok(socket)
}

fn run_blocking(
    socket: Result<Socket, TracerouteError>,
    cancel: &CancellationToken,
    notifications: &UnboundedSender<IcmpNotification>,
) {
    let mut socket = match socket {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "Failed to open raw ICMP socket");
            let message = match &e {
                TracerouteError::SocketCreation(io) if io.kind() == ErrorKind::PermissionDenied => {
                    format!("{e}. Did you forget to run as root?")
                }
                _ => e.to_string(),
            };
            let _ = notifications.send(IcmpNotification::error(message));
            return;
        }
    };
    debug!("ICMP listener started");

    let mut buf = [0u8; RECV_BUFFER_LEN];
    while !cancel.is_cancelled() && !notifications.is_closed() {
        let len = match socket.read(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                let e = TracerouteError::ReceiveFailed(e);
                error!(error = %e, "ICMP listener stopping");
                let _ = notifications.send(IcmpNotification::error(e.to_string()));
                return;
            }
        };

        match decode_icmp_ttl_exceeded(&buf[..len]) {
            Ok(Decoded::TtlExceeded(probe)) => {
                trace!(
                    origin = %probe.origin,
                    destination = %probe.destination,
                    responder = %probe.responder,
                    "TTL exceeded"
                );
                let notification =
                    IcmpNotification::ttl_exceeded(probe.origin, Endpoint::new(probe.responder, 0));
                if notifications.send(notification).is_err() {
                    break;
                }
            }
            Ok(Decoded::NotRelevant) => trace!(len, "Ignoring ICMP packet"),
            Err(e) => debug!(len, error = %e, "Dropping undecodable ICMP packet"),
        }
    }
    debug!("ICMP listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet_packet::icmp::IcmpPacket;
    use socket2::SockAddr;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tracetcp_core::NotificationKind;

    /// ICMP time exceeded quoting a TCP segment sent from `origin`.
    fn ttl_exceeded_message(origin: Endpoint) -> Vec<u8> {
        let mut msg = vec![11, 0, 0, 0, 0, 0, 0, 0];
        let mut quoted = [0u8; 20];
        quoted[0] = 0x45;
        quoted[8] = 1;
        quoted[9] = 6;
        quoted[12..16].copy_from_slice(&origin.addr.octets());
        quoted[16..20].copy_from_slice(&Ipv4Addr::new(127, 0, 0, 2).octets());
        msg.extend_from_slice(&quoted);
        msg.extend_from_slice(&origin.port.to_be_bytes());
        msg.extend_from_slice(&[0x01, 0xbb, 0, 0, 0, 1]);

        let checksum = pnet_packet::icmp::checksum(&IcmpPacket::new(&msg).unwrap());
        msg[2..4].copy_from_slice(&checksum.to_be_bytes());
        msg
    }

    /// Works with or without privilege: either the socket opens and shutdown
    /// must interrupt the receive loop, or startup reports an error.
    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let listener = RawIcmpListener::with_poll_interval(Duration::from_millis(20));
        let mut handle = listener.spawn();

        let first = tokio::time::timeout(Duration::from_millis(100), handle.notifications().recv())
            .await;
        if let Ok(Some(n)) = first {
            if n.kind == NotificationKind::Error {
                assert!(n.error.is_some());
            }
        }

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("listener did not stop");
    }

    /// A reply sent straight after `spawn` returns must be published. Needs
    /// CAP_NET_RAW to inject the reply; without it there is nothing to check.
    #[tokio::test]
    async fn test_reply_right_after_spawn_is_published() {
        let sender = match Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) {
            Ok(sender) => sender,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return,
            Err(e) => panic!("raw socket: {e}"),
        };
        let loopback = SockAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let listener = RawIcmpListener::with_poll_interval(Duration::from_millis(20));

        for round in 0..20u16 {
            let origin = Endpoint::new(Ipv4Addr::LOCALHOST, 41000 + round);
            let mut handle = listener.spawn();
            sender
                .send_to(&ttl_exceeded_message(origin), &loopback)
                .unwrap();

            let published = tokio::time::timeout(Duration::from_secs(1), async {
                while let Some(n) = handle.notifications().recv().await {
                    assert_eq!(n.kind, NotificationKind::TtlExceeded, "{:?}", n.error);
                    if n.origin == origin {
                        return Some(n);
                    }
                }
                None
            })
            .await;
            let n = published
                .unwrap_or_else(|_| panic!("round {round}: reply not published"))
                .expect("listener stopped");
            assert_eq!(n.source.addr, Ipv4Addr::LOCALHOST);

            handle.shutdown().await;
        }
    }
}
