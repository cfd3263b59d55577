//! HTTP server binary for tracetcp.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracetcp_core::config::parse_duration;
use tracetcp_server::{create_router, AppState, TraceRunner, DEFAULT_PORT};

/// tracetcp HTTP server.
#[derive(Parser, Debug)]
#[command(name = "tracetcp-server")]
#[command(version)]
#[command(about = "Serves TCP traceroutes over HTTP")]
struct Args {
    /// Max time allowed for a trace.
    #[arg(short = 't', long = "trace-timeout", default_value = "30s", value_parser = parse_duration)]
    trace_timeout: Duration,

    /// HTTP listen port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Max concurrent traces.
    #[arg(short = 'c', long = "concurrent", default_value_t = 30)]
    concurrent: usize,

    /// Trace binary to run.
    #[arg(long, default_value = "tracetcp")]
    binary: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.log_level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let state = AppState {
        runner: Arc::new(TraceRunner::new(
            args.binary,
            args.trace_timeout,
            args.concurrent,
        )),
    };
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        max_concurrent = args.concurrent,
        trace_timeout = ?args.trace_timeout,
        "Listening on {}",
        addr
    );

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        eprintln!("Server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
