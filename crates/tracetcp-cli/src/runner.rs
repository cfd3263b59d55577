//! Runs one trace from parsed options to rendered output.

use crate::dns::{resolve_ipv4, ReverseResolver};
use crate::writer::{self, OutputFormat, WriterConfig};
use std::sync::Arc;
use std::time::Duration;
use tracetcp_core::config::{split_host_and_port, DEFAULT_PORT};
use tracetcp_core::{
    Endpoint, TraceEngine, TraceEventKind, TraceParams, TraceSession, TracerouteError,
};
use tracetcp_packets::RawIcmpListener;
use tracetcp_tcp::ConnectProber;
use tracing::{debug, info};

/// Everything the command line decides about a trace.
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// "host", "host:port" or "host:service".
    pub target: String,
    pub start_ttl: u8,
    pub end_ttl: u8,
    pub queries_per_hop: u16,
    pub timeout: Duration,
    pub no_lookups: bool,
    pub format: OutputFormat,
}

/// Resolves the target, runs the trace and writes it to stdout.
///
/// Returns the terminal event kind. Ctrl-C aborts the trace between probes.
pub async fn run_trace(options: TraceOptions) -> Result<TraceEventKind, TracerouteError> {
    let (host, port) = split_host_and_port(&options.target, DEFAULT_PORT)?;
    let addr = resolve_ipv4(&host).await?;
    let params = TraceParams {
        start_ttl: options.start_ttl,
        end_ttl: options.end_ttl,
        queries_per_hop: options.queries_per_hop,
        timeout: options.timeout,
        ..TraceParams::new(Endpoint::new(addr, port))
    };

    let engine = TraceEngine::new(
        Arc::new(ConnectProber::new()),
        Arc::new(RawIcmpListener::new()),
    );
    let session = TraceSession::new();
    let mut events = session.begin_trace(&engine, params)?;

    let names = if options.no_lookups {
        None
    } else {
        ReverseResolver::from_system_conf()
    };
    let mut writer = writer::create(
        options.format,
        WriterConfig {
            target: options.target.clone(),
            port,
            end_ttl: options.end_ttl,
            queries_per_hop: options.queries_per_hop,
        },
        std::io::stdout(),
        names,
    );

    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, aborting trace");
                session.abort_trace();
            }
        })
    };

    let mut last = TraceEventKind::Started;
    while let Some(event) = events.next().await {
        last = event.kind;
        writer
            .event(&event)
            .await
            .map_err(|e| TracerouteError::Internal(format!("failed to write output: {e}")))?;
    }
    interrupt.abort();
    events.finish().await?;

    debug!(terminal = %last, "Trace finished");
    Ok(last)
}
