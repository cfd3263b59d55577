//! Serializable trace output.
//!
//! These types are the JSON shape written by the `json` output format and
//! read back by anything consuming it.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::{TraceEvent, TraceEventKind};

/// A single event in serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub kind: TraceEventKind,
    pub hop: u8,
    pub query: u16,
    /// The address that answered, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<Ipv4Addr>,
    /// Round-trip time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TraceEvent> for TraceRecord {
    fn from(event: &TraceEvent) -> Self {
        Self {
            kind: event.kind,
            hop: event.hop,
            query: event.query,
            remote_addr: event.remote_addr,
            rtt_ms: event.rtt.map(|d| d.as_secs_f64() * 1000.0),
            error: event.error.clone(),
        }
    }
}

/// Everything one trace produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    /// Target as given on the command line.
    pub destination: String,
    pub port: u16,
    pub events: Vec<TraceRecord>,
}

impl TraceReport {
    pub fn new(destination: impl Into<String>, port: u16) -> Self {
        Self {
            destination: destination.into(),
            port,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: &TraceEvent) {
        self.events.push(event.into());
    }

    /// Returns true once a terminal marker has been recorded.
    pub fn is_finished(&self) -> bool {
        self.events.last().is_some_and(|r| r.kind.is_terminal())
    }

    /// Serializes the report to JSON with indentation.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
