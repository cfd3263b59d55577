//! Trace execution.
//!
//! [`TraceEngine`] runs the hop loop; [`TraceSession`] guards it so that one
//! trace runs at a time and exposes the event stream and abort signal.

pub mod engine;
pub mod session;

pub use engine::TraceEngine;
pub use session::{TraceEvents, TraceSession};
