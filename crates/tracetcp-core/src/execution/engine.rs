//! Hop-by-hop trace execution.
//!
//! Probes one (ttl, query) pair at a time, correlates each outcome with the
//! listener's notifications, and turns the result into the event stream.

use crate::correlate::Correlator;
use crate::{
    IcmpNotification, NotificationListener, ProbeExecutor, TraceEvent, TraceEventKind,
    TraceParams, TracerouteError,
};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// How the probe loop stopped.
enum Ending {
    /// TTL range exhausted, or the destination answered.
    Completed,
    /// A probe or the listener failed; the event is the terminal marker.
    Failed(TraceEvent),
    /// Abort seen before probing (`hop`, `query`).
    Aborted { hop: u8, query: u16 },
    Violation {
        hop: u8,
        query: u16,
        error: TracerouteError,
    },
}

/// Runs traces against a prober and a notification source.
#[derive(Clone)]
pub struct TraceEngine {
    prober: Arc<dyn ProbeExecutor>,
    listener: Arc<dyn NotificationListener>,
}

impl TraceEngine {
    pub fn new(prober: Arc<dyn ProbeExecutor>, listener: Arc<dyn NotificationListener>) -> Self {
        Self { prober, listener }
    }

    /// Runs one trace to its terminal marker.
    ///
    /// `abort` is checked before every probe. Returns an error only for an
    /// internal invariant violation; every other failure is reported as a
    /// `Failed` event.
    pub async fn run(
        &self,
        params: &TraceParams,
        abort: &CancellationToken,
        events: &UnboundedSender<TraceEvent>,
    ) -> Result<(), TracerouteError> {
        let started = Instant::now();
        info!(
            destination = %params.destination,
            start_ttl = params.start_ttl,
            end_ttl = params.end_ttl,
            queries = params.queries_per_hop,
            "Starting trace"
        );
        emit(
            events,
            TraceEvent::marker(TraceEventKind::Started).with_remote(params.destination.addr),
        );

        let mut listener = self.listener.spawn();
        let correlator = Correlator::new(params.correlation_window);
        let ending = self
            .probe_hops(params, abort, &correlator, listener.notifications(), events)
            .await;
        listener.shutdown().await;

        match ending {
            Ending::Completed => {
                debug!(elapsed = ?started.elapsed(), "Trace completed");
                emit(
                    events,
                    TraceEvent::marker(TraceEventKind::Completed).with_rtt(started.elapsed()),
                );
                Ok(())
            }
            Ending::Failed(event) => {
                debug!(hop = event.hop, error = ?event.error, "Trace failed");
                emit(events, event);
                Ok(())
            }
            Ending::Aborted { hop, query } => {
                info!(next_hop = hop, next_query = query, "Trace aborted");
                emit(events, TraceEvent::marker(TraceEventKind::Aborted));
                Ok(())
            }
            Ending::Violation { hop, query, error } => {
                error!(hop, query, error = %error, "Trace stopped on internal error");
                emit(
                    events,
                    TraceEvent::for_probe(TraceEventKind::Failed, hop, query)
                        .with_error(Some(error.to_string())),
                );
                Err(error)
            }
        }
    }

    async fn probe_hops(
        &self,
        params: &TraceParams,
        abort: &CancellationToken,
        correlator: &Correlator,
        notifications: &mut UnboundedReceiver<IcmpNotification>,
        events: &UnboundedSender<TraceEvent>,
    ) -> Ending {
        for ttl in params.start_ttl..=params.end_ttl {
            for query in 0..params.queries_per_hop {
                if abort.is_cancelled() {
                    return Ending::Aborted { hop: ttl, query };
                }

                trace!(ttl, query, "Sending probe");
                let outcome = self
                    .prober
                    .probe(params.destination, ttl, query, params.timeout)
                    .await;

                let correlation = match correlator.correlate(outcome, notifications).await {
                    Ok(c) => c,
                    Err(error) => {
                        return Ending::Violation {
                            hop: ttl,
                            query,
                            error,
                        }
                    }
                };

                if correlation.event.kind == TraceEventKind::Failed {
                    return Ending::Failed(correlation.event);
                }
                emit(events, correlation.event);
                if correlation.terminal {
                    return Ending::Completed;
                }
            }
        }
        Ending::Completed
    }
}

fn emit(events: &UnboundedSender<TraceEvent>, event: TraceEvent) {
    debug!(%event, "Emitting event");
    if events.send(event).is_err() {
        trace!("Event receiver dropped");
    }
}
