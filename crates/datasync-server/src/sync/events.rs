//! Lifecycle events of import and export jobs

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::types::Job;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ImportStarted(Job),
    ImportCompleted(Job),
    ExportStarted(Job),
    ExportCompleted(Job),
}

impl SyncEvent {
    pub fn job(&self) -> &Job {
        match self {
            SyncEvent::ImportStarted(job)
            | SyncEvent::ImportCompleted(job)
            | SyncEvent::ExportStarted(job)
            | SyncEvent::ExportCompleted(job) => job,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::ImportStarted(_) => "import.started",
            SyncEvent::ImportCompleted(_) => "import.completed",
            SyncEvent::ExportStarted(_) => "export.started",
            SyncEvent::ExportCompleted(_) => "export.completed",
        }
    }
}

/// Fan-out of [`SyncEvent`]s to any number of listeners
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishing with no listeners is not an error
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Log a notification for the initiator of every finished job
pub fn spawn_notification_listener(bus: &EventBus) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let job = event.job();
                    let initiator = job.initiator.as_ref().map(|i| format!("{}:{}", i.kind, i.id));
                    info!(
                        event = event.name(),
                        job = %job.key(),
                        status = %job.status,
                        processed = job.total_rows_processed,
                        failed = job.total_rows_failed,
                        initiator = initiator.as_deref().unwrap_or("-"),
                        "Job notification"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
