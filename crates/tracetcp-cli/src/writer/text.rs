//! Human-readable output, one row per hop.

use super::{TraceWriter, WriterConfig};
use crate::dns::ReverseResolver;
use async_trait::async_trait;
use std::io::{self, Write};
use std::net::Ipv4Addr;
use tracetcp_core::{TraceEvent, TraceEventKind};

pub struct StdTraceWriter<W> {
    config: WriterConfig,
    out: W,
    names: Option<ReverseResolver>,
    current_hop: u8,
    current_addr: Option<Ipv4Addr>,
    row_open: bool,
}

impl<W: Write + Send> StdTraceWriter<W> {
    /// `names` enables reverse lookups of hop addresses.
    pub fn new(config: WriterConfig, out: W, names: Option<ReverseResolver>) -> Self {
        Self {
            config,
            out,
            names,
            current_hop: 0,
            current_addr: None,
            row_open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_row(&mut self) -> io::Result<()> {
        if self.row_open {
            self.row_open = false;
            writeln!(self.out)?;
        }
        Ok(())
    }
}

/// "name (addr)" when a PTR record exists, otherwise the bare address.
async fn hop_label(names: Option<&ReverseResolver>, addr: Ipv4Addr) -> String {
    let name = match names {
        Some(names) => names.lookup(addr).await,
        None => None,
    };
    match name {
        Some(name) => format!("{name} ({addr})"),
        None => addr.to_string(),
    }
}

#[async_trait]
impl<W: Write + Send> TraceWriter for StdTraceWriter<W> {
    async fn event(&mut self, event: &TraceEvent) -> io::Result<()> {
        if event.hop != 0 && event.hop != self.current_hop {
            self.current_hop = event.hop;
            self.current_addr = None;
            write!(self.out, "\n{:<3}", event.hop)?;
            self.row_open = true;
        }

        let port = self.config.port;
        let addr = event
            .remote_addr
            .map(|a| a.to_string())
            .unwrap_or_default();
        match event.kind {
            TraceEventKind::Started => writeln!(
                self.out,
                "Tracing route to {addr} on port {port} over a maximum of {} hops:",
                self.config.end_ttl
            )?,
            TraceEventKind::ProbeTimedOut => write!(self.out, "{:>8}", "*")?,
            TraceEventKind::HopReached => {
                self.current_addr = event.remote_addr;
                let rtt = event.rtt.unwrap_or_default().as_millis();
                write!(self.out, "{:>8}", format!("{rtt}ms"))?;
            }
            TraceEventKind::Connected => {
                writeln!(self.out, "Connected to {addr} on port {port}")?;
                self.row_open = false;
            }
            TraceEventKind::RemoteClosed => {
                writeln!(self.out, "Port {port} closed at {addr}")?;
                self.row_open = false;
            }
            TraceEventKind::Failed => {
                self.end_row()?;
                writeln!(
                    self.out,
                    "Trace failed: {}",
                    event.error.as_deref().unwrap_or("unknown error")
                )?;
            }
            TraceEventKind::Aborted => {
                self.end_row()?;
                writeln!(self.out, "Trace aborted")?;
            }
            TraceEventKind::Completed => self.end_row()?,
        }

        let row_done = event.query + 1 == self.config.queries_per_hop
            && matches!(
                event.kind,
                TraceEventKind::HopReached | TraceEventKind::ProbeTimedOut
            );
        if let (true, Some(hop_addr)) = (row_done, self.current_addr) {
            let label = hop_label(self.names.as_ref(), hop_addr).await;
            write!(self.out, "\t{label}")?;
        }
        self.out.flush()
    }
}
