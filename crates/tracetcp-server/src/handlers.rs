//! HTTP request handlers.

use crate::runner::{RunnerError, TraceRunner};
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracetcp_core::config::{format_duration, parse_duration, DEFAULT_END_TTL};
use tracing::{info, warn};

/// Longest per-probe timeout a request may ask for.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Highest end hop a request may ask for.
pub const MAX_END_HOP: u32 = 127;
/// Most probes per hop a request may ask for.
pub const MAX_QUERIES: u32 = 5;

/// A trace as requested over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRequest {
    pub host: String,
    /// Port number or service name.
    pub port: String,
    pub start_hop: u32,
    pub end_hop: u32,
    pub queries: u32,
    pub timeout: Duration,
    pub no_lookup: bool,
}

impl Default for TraceRequest {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: "80".to_string(),
            start_hop: 1,
            end_hop: u32::from(DEFAULT_END_TTL),
            queries: 3,
            timeout: Duration::from_secs(1),
            no_lookup: false,
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadRequest(pub String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.0).into_response()
    }
}

fn parse_number(name: &str, value: &str) -> Result<u32, BadRequest> {
    value
        .parse()
        .map_err(|_| BadRequest(format!("Invalid {name}: {value}")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, BadRequest> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(BadRequest(format!("Invalid {name}: {value}"))),
    }
}

/// Overlays query parameters on `defaults`. Absent parameters keep their default.
pub fn parse_request(
    defaults: &TraceRequest,
    params: &HashMap<String, String>,
) -> Result<TraceRequest, BadRequest> {
    let mut request = defaults.clone();
    if let Some(host) = params.get("host") {
        request.host = host.clone();
    }
    if let Some(port) = params.get("port") {
        request.port = port.clone();
    }
    if let Some(v) = params.get("starthop") {
        request.start_hop = parse_number("starthop", v)?;
    }
    if let Some(v) = params.get("endhop") {
        request.end_hop = parse_number("endhop", v)?;
    }
    if let Some(v) = params.get("queries") {
        request.queries = parse_number("queries", v)?;
    }
    if let Some(v) = params.get("timeout") {
        request.timeout =
            parse_duration(v).map_err(|_| BadRequest(format!("Invalid timeout: {v}")))?;
    }
    if let Some(v) = params.get("nolookup") {
        request.no_lookup = parse_flag("nolookup", v)?;
    }
    Ok(request)
}

/// Host and port values are passed to a child process, so only letters,
/// digits and dots are accepted.
fn is_safe_token(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_alphanumeric() || c == '.')
}

pub fn validate_request(request: &TraceRequest) -> Result<(), BadRequest> {
    if !is_safe_token(&request.host) {
        return Err(BadRequest("Invalid Host Name".into()));
    }
    if !is_safe_token(&request.port) {
        return Err(BadRequest("Invalid Port Number".into()));
    }
    if request.start_hop < 1 {
        return Err(BadRequest("Start hop must be at least 1".into()));
    }
    if request.end_hop < 1 || request.end_hop > MAX_END_HOP {
        return Err(BadRequest(format!(
            "End hop must be between 1 and {MAX_END_HOP}"
        )));
    }
    if request.start_hop > request.end_hop {
        return Err(BadRequest("Start hop is after end hop".into()));
    }
    if request.queries < 1 || request.queries > MAX_QUERIES {
        return Err(BadRequest(format!(
            "Queries must be between 1 and {MAX_QUERIES}"
        )));
    }
    if request.timeout.is_zero() || request.timeout > MAX_PROBE_TIMEOUT {
        return Err(BadRequest(format!(
            "Timeout must be more than 0 and at most {}",
            format_duration(MAX_PROBE_TIMEOUT)
        )));
    }
    Ok(())
}

/// Arguments for the trace binary.
pub fn make_command_line(request: &TraceRequest) -> Vec<String> {
    let mut args = Vec::new();
    if request.no_lookup {
        args.push("-n".to_string());
    }
    args.extend([
        "-h".to_string(),
        request.start_hop.to_string(),
        "-m".to_string(),
        request.end_hop.to_string(),
        "-p".to_string(),
        request.queries.to_string(),
        "-t".to_string(),
        format_duration(request.timeout),
        format!("{}:{}", request.host, request.port),
    ]);
    args
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<TraceRunner>,
}

/// Creates the Axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/dotrace", get(handle_dotrace))
        .route("/exec", get(handle_exec))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Health check endpoint.
async fn handle_health() -> &'static str {
    "ok"
}

/// Handles GET /dotrace with the full set of trace options.
async fn handle_dotrace(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request = match parse_request(&TraceRequest::default(), &params)
        .and_then(|r| validate_request(&r).map(|_| r))
    {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    info!(host = %request.host, port = %request.port, "Trace requested");
    stream_trace(&state, make_command_line(&request))
}

/// Handles GET /exec: host and port only. `source=ok` traces back to the caller.
async fn handle_exec(
    State(state): State<AppState>,
    client: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut request = TraceRequest {
        host: params.get("host").cloned().unwrap_or_default(),
        ..TraceRequest::default()
    };
    if let Some(port) = params.get("port").filter(|p| !p.is_empty()) {
        request.port = port.clone();
    }
    if params.get("source").map(String::as_str) == Some("ok") {
        match client {
            Some(ConnectInfo(addr)) => request.host = addr.ip().to_string(),
            None => return BadRequest("Client address unavailable".into()).into_response(),
        }
    }
    if let Err(e) = validate_request(&request) {
        return e.into_response();
    }
    info!(host = %request.host, port = %request.port, "Exec requested");
    stream_trace(&state, vec![format!("{}:{}", request.host, request.port)])
}

fn stream_trace(state: &AppState, args: Vec<String>) -> Response {
    match state.runner.start(args) {
        Ok(output) => (
            [("content-type", "text/plain; charset=utf-8")],
            Body::from_stream(output),
        )
            .into_response(),
        Err(RunnerError::Busy) => {
            warn!("Rejecting trace, too many running");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many traces in progress, try again later",
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to start trace");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
