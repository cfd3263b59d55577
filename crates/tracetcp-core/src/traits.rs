//! Seams between the trace engine and the network.

use crate::{Endpoint, IcmpNotification, ProbeOutcome};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Sends one probe and classifies how it ended.
///
/// Implementations never fail: setup problems are reported as an outcome in
/// the `Error` state so the engine can turn them into a trace event.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn probe(
        &self,
        destination: Endpoint,
        ttl: u8,
        query: u16,
        timeout: Duration,
    ) -> ProbeOutcome;
}

/// Starts a background source of ICMP notifications for one trace.
pub trait NotificationListener: Send + Sync {
    /// Starts listening. Startup failures are delivered as an `Error`
    /// notification on the returned handle.
    fn spawn(&self) -> ListenerHandle;
}

/// A running listener: its notification stream plus what is needed to stop it.
pub struct ListenerHandle {
    notifications: UnboundedReceiver<IcmpNotification>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn new(
        notifications: UnboundedReceiver<IcmpNotification>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            notifications,
            cancel,
            task,
        }
    }

    /// The notification stream consumed by the correlator.
    pub fn notifications(&mut self) -> &mut UnboundedReceiver<IcmpNotification> {
        &mut self.notifications
    }

    /// Stops the listener and waits for its task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.notifications.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "ICMP listener task ended abnormally");
            }
        }
    }
}
