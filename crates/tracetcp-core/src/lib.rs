//! Core types, correlation and the trace engine for tracetcp.
//!
//! This crate holds everything that does not touch a socket:
//!
//! - [`ProbeExecutor`] and [`NotificationListener`], the seams to the network
//! - [`Correlator`], which pairs probe outcomes with ICMP notifications
//! - [`TraceEngine`] and [`TraceSession`], which drive a trace and publish
//!   its [`TraceEvent`] stream
//! - [`TracerouteError`] for error handling

pub mod config;
pub mod correlate;
pub mod error;
pub mod execution;
pub mod result;
pub mod traits;
pub mod types;

pub use correlate::{decide, Correlation, Correlator};
pub use error::{TracerouteError, TracerouteResult};
pub use execution::{TraceEngine, TraceEvents, TraceSession};
pub use result::{TraceRecord, TraceReport};
pub use traits::{ListenerHandle, NotificationListener, ProbeExecutor};
pub use types::{
    Endpoint, IcmpNotification, NotificationKind, ProbeOutcome, SocketState, TraceEvent,
    TraceEventKind, TraceParams,
};
