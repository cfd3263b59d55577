//! Per-trace session state and the consumer side of the event stream.

use super::TraceEngine;
use crate::{TraceEvent, TraceParams, TracerouteError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Abort token of the running trace; `None` while idle.
#[derive(Debug, Default)]
struct SessionState {
    current: Mutex<Option<CancellationToken>>,
}

/// Marks the session idle when the engine task ends, including by panic.
struct RunningGuard(Arc<SessionState>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = self.0.current.lock() {
            current.take();
        }
    }
}

/// A handle that runs at most one trace at a time.
///
/// Clones share state, so any clone can abort the running trace.
#[derive(Debug, Clone, Default)]
pub struct TraceSession {
    state: Arc<SessionState>,
}

impl TraceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a trace on the current tokio runtime and returns its event stream.
    ///
    /// Fails without touching session state if `params` are invalid or a
    /// trace is already running.
    pub fn begin_trace(
        &self,
        engine: &TraceEngine,
        params: TraceParams,
    ) -> Result<TraceEvents, TracerouteError> {
        params.validate()?;
        let abort = {
            let mut current = self
                .state
                .current
                .lock()
                .map_err(|_| TracerouteError::Internal("session mutex poisoned".into()))?;
            if current.is_some() {
                return Err(TracerouteError::TraceInProgress);
            }
            current.insert(CancellationToken::new()).clone()
        };

        let (tx, rx) = unbounded_channel();
        let engine = engine.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            // Dropped in reverse order: the session goes idle before the channel closes.
            let events = tx;
            let _running = RunningGuard(state);
            engine.run(&params, &abort, &events).await
        });

        Ok(TraceEvents { events: rx, task })
    }

    /// Asks the running trace to stop before its next probe. No-op while idle.
    pub fn abort_trace(&self) {
        if let Ok(current) = self.state.current.lock() {
            if let Some(abort) = current.as_ref() {
                debug!("Abort requested");
                abort.cancel();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .current
            .lock()
            .map(|current| current.is_some())
            .unwrap_or(false)
    }
}

/// Ordered events of one trace.
pub struct TraceEvents {
    events: UnboundedReceiver<TraceEvent>,
    task: JoinHandle<Result<(), TracerouteError>>,
}

impl TraceEvents {
    /// Next event, or `None` once the terminal marker has been consumed.
    pub async fn next(&mut self) -> Option<TraceEvent> {
        self.events.recv().await
    }

    /// Waits for the engine task and returns its result.
    pub async fn finish(self) -> Result<(), TracerouteError> {
        self.task
            .await
            .map_err(|e| TracerouteError::Internal(format!("trace task failed: {e}")))?
    }

    /// Drains every event, then joins the engine task.
    pub async fn collect(mut self) -> Result<Vec<TraceEvent>, TracerouteError> {
        let mut collected = Vec::new();
        while let Some(event) = self.next().await {
            collected.push(event);
        }
        self.finish().await?;
        Ok(collected)
    }
}
