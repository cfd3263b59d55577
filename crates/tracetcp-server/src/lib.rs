//! HTTP front-end for tracetcp.
//!
//! Validates trace requests, runs the `tracetcp` binary for each one and
//! streams its output back as the response body.

mod handlers;
mod runner;

pub use handlers::{
    create_router, make_command_line, parse_request, validate_request, AppState, TraceRequest,
};
pub use runner::{RunnerError, TraceRunner};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 80;
