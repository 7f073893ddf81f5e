//! Batch dispatch of chunk work units
//!
//! A batch is a set of independent [`WorkUnit`]s with three hooks:
//!
//! - `on_start` runs once before any unit executes
//! - `on_each_finish` runs after every unit settles (success, failure or cancel)
//! - `on_all_finish` runs once after every unit has settled
//!
//! Units run concurrently, bounded per queue, and are retried with a linear
//! backoff before being reported as failed. When a batch does not allow
//! failures, the first failed unit cancels every unit that has not started.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use crate::config::DispatchSettings;

/// Identifier shared by all units of a batch and used to name their artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of background work
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Short label used in logs
    fn describe(&self) -> String;

    async fn run(&self) -> anyhow::Result<()>;

    /// Called once after the last attempt failed
    async fn failed(&self, _error: &anyhow::Error) {}
}

/// Progress snapshot passed to `on_each_finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub total_units: usize,
    pub settled_units: usize,
    pub failed_units: usize,
}

/// Final state of a batch passed to `on_all_finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_id: BatchId,
    pub total_units: usize,
    pub failed_units: usize,
    pub cancelled_units: usize,
}

impl BatchOutcome {
    pub fn has_failures(&self) -> bool {
        self.failed_units > 0 || self.cancelled_units > 0
    }
}

pub type StartHook = Box<dyn FnOnce(BatchId) -> BoxFuture<'static, ()> + Send>;
pub type ProgressHook = Arc<dyn Fn(BatchProgress) + Send + Sync>;
pub type FinishHook = Box<dyn FnOnce(BatchOutcome) -> BoxFuture<'static, ()> + Send>;

/// Name, queue and hooks of a batch
pub struct BatchOptions {
    pub id: BatchId,
    pub name: String,
    pub queue: String,
    pub allow_failures: bool,
    pub on_start: Option<StartHook>,
    pub on_each_finish: Option<ProgressHook>,
    pub on_all_finish: Option<FinishHook>,
}

impl BatchOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BatchId::new(),
            name: name.into(),
            queue: crate::config::DEFAULT_QUEUE.to_string(),
            allow_failures: true,
            on_start: None,
            on_each_finish: None,
            on_all_finish: None,
        }
    }

    pub fn with_id(mut self, id: BatchId) -> Self {
        self.id = id;
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn allow_failures(mut self, allow: bool) -> Self {
        self.allow_failures = allow;
        self
    }

    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(BatchId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |id| Box::pin(hook(id))));
        self
    }

    pub fn on_each_finish<F>(mut self, hook: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.on_each_finish = Some(Arc::new(hook));
        self
    }

    pub fn on_all_finish<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(BatchOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_all_finish = Some(Box::new(move |outcome| Box::pin(hook(outcome))));
        self
    }
}

/// Submits work for background execution
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch_batch(
        &self,
        units: Vec<Arc<dyn WorkUnit>>,
        options: BatchOptions,
    ) -> SyncResult<BatchId>;

    async fn dispatch_one(&self, unit: Arc<dyn WorkUnit>, queue: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitResult {
    Succeeded,
    Failed,
    Cancelled,
}

/// In-process dispatcher backed by tokio tasks
pub struct TokioDispatcher {
    settings: DispatchSettings,
    queues: Mutex<HashMap<String, Arc<Semaphore>>>,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl TokioDispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            queues: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Wait until every dispatched batch and unit has settled, hooks included
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Reject new work and wait for running work to drain
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tracker.close();
        self.tracker.wait().await;
        info!("Dispatcher drained");
    }

    fn queue(&self, name: &str) -> SyncResult<Arc<Semaphore>> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| SyncError::Dispatch("queue registry poisoned".to_string()))?;
        Ok(queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.concurrency.max(1))))
            .clone())
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Dispatch("dispatcher is shut down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for TokioDispatcher {
    async fn dispatch_batch(
        &self,
        units: Vec<Arc<dyn WorkUnit>>,
        options: BatchOptions,
    ) -> SyncResult<BatchId> {
        self.ensure_open()?;

        let BatchOptions {
            id: batch_id,
            name,
            queue,
            allow_failures,
            on_start,
            on_each_finish,
            on_all_finish,
        } = options;

        let permits = self.queue(&queue)?;
        let settings = self.settings.clone();
        let total_units = units.len();

        info!(
            batch_id = %batch_id,
            batch = %name,
            queue = %queue,
            units = total_units,
            allow_failures,
            "Dispatching batch"
        );

        self.tracker.spawn(async move {
            if let Some(hook) = on_start {
                hook(batch_id).await;
            }

            let abort = Arc::new(AtomicBool::new(false));
            let mut running = JoinSet::new();
            for unit in units {
                let permits = permits.clone();
                let settings = settings.clone();
                let abort = abort.clone();
                running.spawn(async move {
                    let result = execute(&unit, &permits, &settings, &abort).await;
                    if result == UnitResult::Failed && !allow_failures {
                        abort.store(true, Ordering::SeqCst);
                    }
                    result
                });
            }

            let mut settled_units = 0;
            let mut failed_units = 0;
            let mut cancelled_units = 0;
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok(UnitResult::Succeeded) => {}
                    Ok(UnitResult::Failed) => failed_units += 1,
                    Ok(UnitResult::Cancelled) => cancelled_units += 1,
                    Err(err) => {
                        error!(batch_id = %batch_id, error = %err, "Work unit task aborted");
                        failed_units += 1;
                    }
                }
                settled_units += 1;
                if let Some(ref hook) = on_each_finish {
                    hook(BatchProgress {
                        batch_id,
                        total_units,
                        settled_units,
                        failed_units,
                    });
                }
            }

            let outcome = BatchOutcome {
                batch_id,
                total_units,
                failed_units,
                cancelled_units,
            };
            info!(
                batch_id = %batch_id,
                batch = %name,
                failed = failed_units,
                cancelled = cancelled_units,
                "Batch settled"
            );

            if let Some(hook) = on_all_finish {
                hook(outcome).await;
            }
        });

        Ok(batch_id)
    }

    async fn dispatch_one(&self, unit: Arc<dyn WorkUnit>, queue: &str) -> SyncResult<()> {
        self.ensure_open()?;

        let permits = self.queue(queue)?;
        let settings = self.settings.clone();
        debug!(unit = %unit.describe(), queue = %queue, "Dispatching unit");

        self.tracker.spawn(async move {
            let never = AtomicBool::new(false);
            execute(&unit, &permits, &settings, &never).await;
        });

        Ok(())
    }
}

/// Run a unit with retries, holding a queue permit only while it executes
async fn execute(
    unit: &Arc<dyn WorkUnit>,
    permits: &Arc<Semaphore>,
    settings: &DispatchSettings,
    abort: &AtomicBool,
) -> UnitResult {
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = {
            let _permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return UnitResult::Cancelled,
            };
            if abort.load(Ordering::SeqCst) {
                debug!(unit = %unit.describe(), "Skipping unit of aborted batch");
                return UnitResult::Cancelled;
            }

            let task = unit.clone();
            match tokio::spawn(async move { task.run().await }).await {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("Work unit panicked: {}", err)),
            }
        };

        match result {
            Ok(()) => return UnitResult::Succeeded,
            Err(err) if attempt < max_attempts => {
                warn!(
                    unit = %unit.describe(),
                    attempt,
                    max_attempts,
                    error = %format!("{:#}", err),
                    "Work unit failed, retrying"
                );
                tokio::time::sleep(settings.retry_backoff * attempt).await;
            }
            Err(err) => {
                error!(
                    unit = %unit.describe(),
                    attempts = attempt,
                    error = %format!("{:#}", err),
                    "Work unit failed"
                );
                unit.failed(&err).await;
                return UnitResult::Failed;
            }
        }
    }
}
