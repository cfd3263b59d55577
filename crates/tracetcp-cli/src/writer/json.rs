//! JSON output, written once the trace has ended.

use super::{TraceWriter, WriterConfig};
use async_trait::async_trait;
use std::io::{self, Write};
use tracetcp_core::{TraceEvent, TraceReport};

pub struct JsonTraceWriter<W> {
    out: W,
    report: TraceReport,
}

impl<W: Write + Send> JsonTraceWriter<W> {
    pub fn new(config: WriterConfig, out: W) -> Self {
        Self {
            out,
            report: TraceReport::new(config.target, config.port),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> TraceWriter for JsonTraceWriter<W> {
    async fn event(&mut self, event: &TraceEvent) -> io::Result<()> {
        self.report.push(event);
        if self.report.is_finished() {
            let json = self.report.to_json_pretty()?;
            writeln!(self.out, "{json}")?;
            self.out.flush()?;
        }
        Ok(())
    }
}
