//! Output formats for the trace event stream.

mod json;
mod text;

pub use json::JsonTraceWriter;
pub use text::StdTraceWriter;

use crate::dns::ReverseResolver;
use async_trait::async_trait;
use clap::ValueEnum;
use tracetcp_core::TraceEvent;

/// Consumes trace events as they arrive.
#[async_trait]
pub trait TraceWriter: Send {
    async fn event(&mut self, event: &TraceEvent) -> std::io::Result<()>;
}

/// Output format selected with `-f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, one row per hop.
    #[default]
    Std,
    /// One JSON document once the trace ends.
    Json,
}

/// What the writers need to know about the trace beyond its events.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Target as given on the command line.
    pub target: String,
    pub port: u16,
    pub end_ttl: u8,
    pub queries_per_hop: u16,
}

/// Creates the writer for `format`.
pub fn create<W>(
    format: OutputFormat,
    config: WriterConfig,
    out: W,
    names: Option<ReverseResolver>,
) -> Box<dyn TraceWriter>
where
    W: std::io::Write + Send + 'static,
{
    match format {
        OutputFormat::Std => Box::new(StdTraceWriter::new(config, out, names)),
        OutputFormat::Json => Box::new(JsonTraceWriter::new(config, out)),
    }
}
