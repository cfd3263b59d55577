//! CLI for tracetcp.

mod dns;
mod runner;
mod writer;

use clap::{ArgAction, Parser};
use runner::TraceOptions;
use std::process::ExitCode;
use std::time::Duration;
use tracetcp_core::config::{
    parse_duration, DEFAULT_END_TTL, DEFAULT_QUERIES_PER_HOP, DEFAULT_START_TTL,
};
use tracetcp_core::TraceEventKind;
use writer::OutputFormat;

/// TCP traceroute: finds the path to a host and port using TCP connects.
#[derive(Parser, Debug)]
#[command(name = "tracetcp")]
#[command(version)]
#[command(disable_help_flag = true)]
#[command(about = "Traces the route to a host and port using TCP connection attempts")]
pub struct Args {
    /// Target as host, host:port or host:service (default port 80).
    #[arg(required = true)]
    pub target: String,

    /// Wait time per probe, e.g. 1s or 500ms.
    #[arg(short = 't', long, default_value = "1s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Do not resolve hop addresses to names.
    #[arg(short = 'n', long = "no-lookups")]
    pub no_lookups: bool,

    /// First hop to probe.
    #[arg(short = 'h', long = "start-hop", default_value_t = DEFAULT_START_TTL)]
    pub start_hop: u8,

    /// Last hop to probe.
    #[arg(short = 'm', long = "max-hops", default_value_t = DEFAULT_END_TTL)]
    pub max_hops: u8,

    /// Probes per hop.
    #[arg(short = 'p', long = "queries", default_value_t = DEFAULT_QUERIES_PER_HOP)]
    pub queries: u16,

    /// Output format.
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Std)]
    pub format: OutputFormat,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

impl Args {
    fn to_options(&self) -> TraceOptions {
        TraceOptions {
            target: self.target.clone(),
            start_ttl: self.start_hop,
            end_ttl: self.max_hops,
            queries_per_hop: self.queries,
            timeout: self.timeout,
            no_lookups: self.no_lookups,
            format: self.format,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging; stdout carries the trace itself
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        destination = %args.target,
        start_hop = args.start_hop,
        max_hops = args.max_hops,
        queries = args.queries,
        "Parsed arguments"
    );

    match runner::run_trace(args.to_options()).await {
        Ok(TraceEventKind::Failed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Traceroute failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["tracetcp", "example.com"]).unwrap();
        assert_eq!(args.timeout, Duration::from_secs(1));
        assert_eq!(args.start_hop, 1);
        assert_eq!(args.max_hops, 30);
        assert_eq!(args.queries, 3);
        assert_eq!(args.format, OutputFormat::Std);
        assert!(!args.no_lookups);
    }

    #[test]
    fn test_short_flags() {
        let args = Args::try_parse_from([
            "tracetcp", "-n", "-h", "3", "-m", "12", "-p", "1", "-t", "250ms", "-f", "json",
            "example.com:https",
        ])
        .unwrap();
        let options = args.to_options();
        assert!(options.no_lookups);
        assert_eq!(options.start_ttl, 3);
        assert_eq!(options.end_ttl, 12);
        assert_eq!(options.queries_per_hop, 1);
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.format, OutputFormat::Json);
        assert_eq!(options.target, "example.com:https");
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Args::try_parse_from(["tracetcp", "-t", "soon", "example.com"]).is_err());
    }
}
