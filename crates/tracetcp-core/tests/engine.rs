//! Trace scenarios against an in-memory network.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracetcp_core::{
    Endpoint, IcmpNotification, ListenerHandle, NotificationListener, ProbeExecutor,
    ProbeOutcome, SocketState, TraceEngine, TraceEvent, TraceEventKind, TraceParams,
    TraceSession, TracerouteError,
};

const LOCAL_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const DEST: Endpoint = Endpoint::new(Ipv4Addr::new(203, 0, 113, 7), 443);

fn router(ttl: u8) -> Endpoint {
    Endpoint::new(Ipv4Addr::new(10, 0, 0, ttl), 0)
}

/// A path where routers below `destination_hop` answer with TTL exceeded.
#[derive(Default)]
struct FakeNetwork {
    destination_hop: u8,
    destination_state: Option<SocketState>,
    probe_error: Option<String>,
    silent_routers: bool,
    listener_error: Option<String>,
    probe_delay: Duration,
    abort_at_ttl: Option<(u8, TraceSession)>,
    icmp: Mutex<Option<UnboundedSender<IcmpNotification>>>,
    next_port: AtomicU16,
    probes: AtomicU16,
}

struct FakeProber(Arc<FakeNetwork>);
struct FakeListener(Arc<FakeNetwork>);

#[async_trait]
impl ProbeExecutor for FakeProber {
    async fn probe(
        &self,
        destination: Endpoint,
        ttl: u8,
        query: u16,
        _timeout: Duration,
    ) -> ProbeOutcome {
        let net = &self.0;
        net.probes.fetch_add(1, Ordering::SeqCst);
        if !net.probe_delay.is_zero() {
            tokio::time::sleep(net.probe_delay).await;
        }
        if let Some((at, session)) = &net.abort_at_ttl {
            if *at == ttl {
                session.abort_trace();
            }
        }

        let local = Endpoint::new(LOCAL_ADDR, 40000 + net.next_port.fetch_add(1, Ordering::SeqCst));
        let reached = net.destination_hop != 0 && ttl >= net.destination_hop;
        if !reached && !net.silent_routers {
            // A late reply for some other probe arrives first.
            let stale = Endpoint::new(LOCAL_ADDR, local.port.wrapping_sub(1));
            if let Some(tx) = net.icmp.lock().unwrap().as_ref() {
                let _ = tx.send(IcmpNotification::ttl_exceeded(stale, router(99)));
                let _ = tx.send(IcmpNotification::ttl_exceeded(local, router(ttl)));
            }
        }

        let state = if reached {
            net.destination_state.unwrap_or(SocketState::Connected)
        } else {
            SocketState::TimedOut
        };
        ProbeOutcome {
            ttl,
            query,
            local,
            remote: destination,
            state,
            error: if reached { net.probe_error.clone() } else { None },
            elapsed: Duration::from_millis(ttl as u64),
        }
    }
}

impl NotificationListener for FakeListener {
    fn spawn(&self) -> ListenerHandle {
        let (tx, rx) = unbounded_channel();
        if let Some(message) = &self.0.listener_error {
            tx.send(IcmpNotification::error(message.clone())).unwrap();
        }
        *self.0.icmp.lock().unwrap() = Some(tx);
        ListenerHandle::new(rx, CancellationToken::new(), None)
    }
}

fn engine(net: &Arc<FakeNetwork>) -> TraceEngine {
    TraceEngine::new(
        Arc::new(FakeProber(Arc::clone(net))),
        Arc::new(FakeListener(Arc::clone(net))),
    )
}

fn params(start_ttl: u8, end_ttl: u8, queries_per_hop: u16) -> TraceParams {
    TraceParams {
        start_ttl,
        end_ttl,
        queries_per_hop,
        timeout: Duration::from_millis(50),
        correlation_window: Duration::from_millis(20),
        ..TraceParams::new(DEST)
    }
}

fn kinds(events: &[TraceEvent]) -> Vec<(TraceEventKind, u8)> {
    events.iter().map(|e| (e.kind, e.hop)).collect()
}

#[tokio::test]
async fn test_reaches_destination_at_hop_three() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 3,
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(1, 5, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, 0),
            (HopReached, 1),
            (HopReached, 2),
            (Connected, 3),
            (Completed, 0)
        ]
    );
    assert_eq!(events[0].remote_addr, Some(DEST.addr));
    assert_eq!(events[1].remote_addr, Some(router(1).addr));
    assert_eq!(events[2].remote_addr, Some(router(2).addr));
    assert_eq!(events[3].remote_addr, Some(DEST.addr));
    assert!(events[4].rtt.is_some());
    assert_eq!(net.probes.load(Ordering::SeqCst), 3);
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_never_reached_completes_after_last_hop() {
    let net = Arc::new(FakeNetwork {
        silent_routers: true,
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(1, 3, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, 0),
            (ProbeTimedOut, 1),
            (ProbeTimedOut, 2),
            (ProbeTimedOut, 3),
            (Completed, 0)
        ]
    );
}

#[tokio::test]
async fn test_events_follow_hop_and_query_order() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 4,
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(2, 10, 3))
        .unwrap()
        .collect()
        .await
        .unwrap();

    let probes: Vec<(u8, u16)> = events
        .iter()
        .filter(|e| !matches!(e.kind, TraceEventKind::Started | TraceEventKind::Completed))
        .map(|e| (e.hop, e.query))
        .collect();
    // Hops 2 and 3 get every query; the first connect at hop 4 ends the trace.
    assert_eq!(
        probes,
        vec![(2, 0), (2, 1), (2, 2), (3, 0), (3, 1), (3, 2), (4, 0)]
    );
    assert_eq!(events.last().unwrap().kind, TraceEventKind::Completed);
}

#[tokio::test]
async fn test_closed_port_is_terminal() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 2,
        destination_state: Some(SocketState::PortClosed),
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(1, 30, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(
        kinds(&events),
        vec![(Started, 0), (HopReached, 1), (RemoteClosed, 2), (Completed, 0)]
    );
}

#[tokio::test]
async fn test_probe_error_fails_trace_without_completion() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 2,
        destination_state: Some(SocketState::Error),
        probe_error: Some("Network is unreachable (os error 101)".into()),
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(1, 30, 2))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(
        kinds(&events),
        vec![(Started, 0), (HopReached, 1), (HopReached, 1), (Failed, 2)]
    );
    let failed = events.last().unwrap();
    assert_eq!(failed.query, 0);
    assert_eq!(
        failed.error.as_deref(),
        Some("Network is unreachable (os error 101)")
    );
    assert_eq!(net.probes.load(Ordering::SeqCst), 3);
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_abort_stops_before_next_hop() {
    let session = TraceSession::new();
    let net = Arc::new(FakeNetwork {
        silent_routers: true,
        abort_at_ttl: Some((2, session.clone())),
        ..Default::default()
    });
    let events = session
        .begin_trace(&engine(&net), params(1, 10, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, 0),
            (ProbeTimedOut, 1),
            (ProbeTimedOut, 2),
            (Aborted, 0)
        ]
    );
    assert!(events.iter().all(|e| e.hop < 3));
    assert_eq!(net.probes.load(Ordering::SeqCst), 2);
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_begin_while_running_is_rejected() {
    let net = Arc::new(FakeNetwork {
        silent_routers: true,
        probe_delay: Duration::from_millis(30),
        ..Default::default()
    });
    let engine = engine(&net);
    let session = TraceSession::new();
    let mut first = session.begin_trace(&engine, params(1, 30, 1)).unwrap();
    assert!(session.is_running());

    let second = session.begin_trace(&engine, params(1, 30, 1));
    assert!(matches!(second, Err(TracerouteError::TraceInProgress)));
    assert!(session.is_running());

    assert_eq!(first.next().await.unwrap().kind, TraceEventKind::Started);
    session.abort_trace();
    let rest = first.collect().await.unwrap();
    assert_eq!(rest.last().unwrap().kind, TraceEventKind::Aborted);
    assert!(!session.is_running());
    // One loop only: never more probes than the first trace could send.
    assert!(net.probes.load(Ordering::SeqCst) <= 2);

    // The session is reusable once the first trace has ended.
    let again = session.begin_trace(&engine, params(1, 1, 1)).unwrap();
    let events = again.collect().await.unwrap();
    assert_eq!(events.last().unwrap().kind, TraceEventKind::Completed);
}

#[tokio::test]
async fn test_listener_error_fails_trace() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 3,
        listener_error: Some("raw socket: Operation not permitted".into()),
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session
        .begin_trace(&engine(&net), params(1, 5, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();

    use TraceEventKind::*;
    assert_eq!(kinds(&events), vec![(Started, 0), (Failed, 1)]);
    assert_eq!(
        events[1].error.as_deref(),
        Some("raw socket: Operation not permitted")
    );
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_invalid_params_leave_session_idle() {
    let net = Arc::new(FakeNetwork::default());
    let session = TraceSession::new();
    let result = session.begin_trace(&engine(&net), params(5, 2, 1));
    assert!(matches!(
        result,
        Err(TracerouteError::InvalidTtlRange {
            start_ttl: 5,
            end_ttl: 2
        })
    ));
    assert!(!session.is_running());
    assert_eq!(net.probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_not_running_once_stream_ends() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 1,
        ..Default::default()
    });
    let session = TraceSession::new();
    let mut events = session.begin_trace(&engine(&net), params(1, 3, 1)).unwrap();
    while events.next().await.is_some() {}
    assert!(!session.is_running());
    events.finish().await.unwrap();
}

#[tokio::test]
async fn test_abort_right_after_begin_stops_first_probe() {
    let net = Arc::new(FakeNetwork {
        silent_routers: true,
        ..Default::default()
    });
    let session = TraceSession::new();
    let events = session.begin_trace(&engine(&net), params(1, 30, 1)).unwrap();
    session.clone().abort_trace();
    let events = events.collect().await.unwrap();

    use TraceEventKind::*;
    assert_eq!(kinds(&events), vec![(Started, 0), (Aborted, 0)]);
    assert_eq!(net.probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_abort_while_idle_does_not_affect_next_trace() {
    let net = Arc::new(FakeNetwork {
        destination_hop: 2,
        ..Default::default()
    });
    let session = TraceSession::new();
    session.abort_trace();
    assert!(!session.is_running());

    let events = session
        .begin_trace(&engine(&net), params(1, 5, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(events.last().unwrap().kind, TraceEventKind::Completed);

    // An abort aimed at a finished trace is not carried into the next one.
    session.abort_trace();
    let events = session
        .begin_trace(&engine(&net), params(1, 5, 1))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(events.last().unwrap().kind, TraceEventKind::Completed);
}
