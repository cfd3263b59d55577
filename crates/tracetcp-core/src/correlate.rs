//! Matching probe outcomes with ICMP notifications.
//!
//! A TCP probe and the ICMP message it may trigger travel on independent
//! paths. After each probe the correlator waits a bounded window for a
//! notification quoting the probe's local endpoint, then folds the pair into
//! exactly one trace event.

use crate::{
    IcmpNotification, NotificationKind, ProbeOutcome, SocketState, TraceEvent, TraceEventKind,
    TracerouteError,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// The event produced for one probe, and whether it ends the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub event: TraceEvent,
    pub terminal: bool,
}

impl Correlation {
    fn continuing(event: TraceEvent) -> Self {
        Self {
            event,
            terminal: false,
        }
    }

    fn terminal(event: TraceEvent) -> Self {
        Self {
            event,
            terminal: true,
        }
    }
}

/// Pairs each probe outcome with at most one notification.
#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    window: Duration,
}

impl Correlator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits for the notification belonging to `outcome` and decides the event.
    ///
    /// Notifications for other probes seen during the wait are dropped.
    pub async fn correlate(
        &self,
        outcome: ProbeOutcome,
        notifications: &mut UnboundedReceiver<IcmpNotification>,
    ) -> Result<Correlation, TracerouteError> {
        let matched = self.await_match(&outcome, notifications).await;
        match &matched {
            Some(n) => debug!(
                ttl = outcome.ttl,
                query = outcome.query,
                local = %outcome.local,
                source = %n.source,
                kind = ?n.kind,
                "Matched ICMP notification"
            ),
            None => debug!(
                ttl = outcome.ttl,
                query = outcome.query,
                local = %outcome.local,
                state = %outcome.state,
                "No matching ICMP notification"
            ),
        }
        decide(outcome, matched)
    }

    async fn await_match(
        &self,
        outcome: &ProbeOutcome,
        notifications: &mut UnboundedReceiver<IcmpNotification>,
    ) -> Option<IcmpNotification> {
        let deadline = Instant::now() + self.window;
        loop {
            match timeout_at(deadline, notifications.recv()).await {
                Ok(Some(n)) if n.concerns(&outcome.local) => return Some(n),
                Ok(Some(n)) => {
                    trace!(
                        origin = %n.origin,
                        source = %n.source,
                        local = %outcome.local,
                        "Discarding notification for another probe"
                    );
                }
                // Listener gone; nothing more can arrive.
                Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CORRELATION_WINDOW)
    }
}

/// Folds a probe outcome and its matched notification (if any) into an event.
///
/// Priority: probe error, listener error, TTL exceeded, then the probe's own
/// socket state. A TTL-exceeded match wins over a `Connected` reading of the
/// same probe.
pub fn decide(
    outcome: ProbeOutcome,
    notification: Option<IcmpNotification>,
) -> Result<Correlation, TracerouteError> {
    if let Some(n) = &notification {
        if n.kind == NotificationKind::TtlExceeded && n.origin != outcome.local {
            return Err(TracerouteError::InvariantViolation(format!(
                "notification for {} correlated with probe bound to {}",
                n.origin, outcome.local
            )));
        }
    }

    let ProbeOutcome {
        ttl,
        query,
        remote,
        state,
        error,
        elapsed,
        ..
    } = outcome;
    let event = |kind| TraceEvent::for_probe(kind, ttl, query);

    let correlation = match (state, notification) {
        (SocketState::Error, _) => {
            Correlation::terminal(event(TraceEventKind::Failed).with_error(error))
        }
        (_, Some(n)) => match n.kind {
            NotificationKind::Error => {
                Correlation::terminal(event(TraceEventKind::Failed).with_error(n.error))
            }
            NotificationKind::TtlExceeded => Correlation::continuing(
                event(TraceEventKind::HopReached)
                    .with_remote(n.source.addr)
                    .with_rtt(elapsed),
            ),
        },
        (SocketState::Connected, None) => Correlation::terminal(
            event(TraceEventKind::Connected)
                .with_remote(remote.addr)
                .with_rtt(elapsed),
        ),
        (SocketState::TimedOut, None) => {
            Correlation::continuing(event(TraceEventKind::ProbeTimedOut))
        }
        (SocketState::PortClosed | SocketState::HostUnreachable, None) => Correlation::terminal(
            event(TraceEventKind::RemoteClosed)
                .with_remote(remote.addr)
                .with_rtt(elapsed),
        ),
    };
    Ok(correlation)
}
