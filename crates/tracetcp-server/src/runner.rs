//! Runs the trace binary and streams what it prints.

use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::io::ReaderStream;
use tracetcp_core::config::format_duration;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Too many traces in progress")]
    Busy,

    #[error("Failed to start trace: {0}")]
    Spawn(#[source] io::Error),
}

/// Child stdout and stderr as they arrive, then a note if the trace was cut short.
pub type TraceOutput = BoxStream<'static, io::Result<Bytes>>;

/// Spawns trace processes, bounded in number and running time.
pub struct TraceRunner {
    binary: PathBuf,
    trace_timeout: Duration,
    slots: Arc<Semaphore>,
}

impl TraceRunner {
    pub fn new(binary: PathBuf, trace_timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            binary,
            trace_timeout,
            slots: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Starts the binary with `args` and returns its output as a stream.
    ///
    /// Fails with `Busy` when every slot is taken. The slot is released when
    /// the process exits or is killed at the trace timeout.
    pub fn start(&self, args: Vec<String>) -> Result<TraceOutput, RunnerError> {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| RunnerError::Busy)?;

        debug!(binary = %self.binary.display(), ?args, "Starting trace process");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunnerError::Spawn)?;

        let stdout = child.stdout.take().map(ReaderStream::new);
        let stderr = child.stderr.take().map(ReaderStream::new);

        let (note_tx, note_rx) = oneshot::channel::<String>();
        let timeout = self.trace_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let note = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => None,
                Ok(Ok(status)) => {
                    debug!(%status, "Trace process failed");
                    Some(format!("{status}\n"))
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Waiting for trace process failed");
                    Some(format!("{e}\n"))
                }
                Err(_) => {
                    warn!(?args, "Trace timed out, killing process");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill trace process");
                    }
                    Some(format!("trace timed out after {}\n", format_duration(timeout)))
                }
            };
            if let Some(note) = note {
                let _ = note_tx.send(note);
            }
        });

        let note = stream::once(note_rx).filter_map(|note| async move { note.ok() });
        let output = stream::select(stream::iter(stdout).flatten(), stream::iter(stderr).flatten())
            .chain(note.map(|note| Ok::<_, io::Error>(Bytes::from(note))));
        Ok(output.boxed())
    }
}
