//! Buffered progress counters

use super::error::SyncResult;
use super::types::JobKey;
use crate::db::{CounterDelta, JobStore};

/// Accumulates per-row outcomes and flushes them to the store in batches
#[derive(Debug)]
pub struct CounterBuffer {
    key: JobKey,
    flush_every: u64,
    pending: CounterDelta,
    processed_total: u64,
    failed_total: u64,
}

impl CounterBuffer {
    pub fn new(key: JobKey, flush_every: u64) -> Self {
        Self {
            key,
            flush_every: flush_every.max(1),
            pending: CounterDelta::default(),
            processed_total: 0,
            failed_total: 0,
        }
    }

    /// Returns true when a flush is due
    pub fn record_processed(&mut self) -> bool {
        self.pending.processed += 1;
        self.processed_total += 1;
        self.is_due()
    }

    /// Returns true when a flush is due
    pub fn record_failed(&mut self) -> bool {
        self.pending.failed += 1;
        self.failed_total += 1;
        self.is_due()
    }

    fn is_due(&self) -> bool {
        (self.pending.processed + self.pending.failed) as u64 >= self.flush_every
    }

    pub async fn flush(&mut self, store: &dyn JobStore) -> SyncResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        store.increment_counters(self.key, self.pending).await?;
        self.pending = CounterDelta::default();
        Ok(())
    }

    pub fn processed_total(&self) -> u64 {
        self.processed_total
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::{InMemoryJobStore, NewJob};
    use crate::sync::types::JobKind;

    #[tokio::test]
    async fn test_flushes_in_batches() {
        let store = InMemoryJobStore::new();
        let key = store
            .create(NewJob {
                kind: JobKind::Import,
                initiator: None,
                filename: None,
                processor: "users".into(),
                file_total_rows: 500,
            })
            .await
            .unwrap()
            .key();

        let mut buffer = CounterBuffer::new(key, 100);
        for i in 0..250 {
            let due = if i % 10 == 0 {
                buffer.record_failed()
            } else {
                buffer.record_processed()
            };
            if due {
                buffer.flush(&store).await.unwrap();
            }
        }

        let job = store.get(key).await.unwrap();
        assert_eq!(job.total_rows_processed + job.total_rows_failed, 200);

        buffer.flush(&store).await.unwrap();
        let job = store.get(key).await.unwrap();
        assert_eq!(job.total_rows_processed, 225);
        assert_eq!(job.total_rows_failed, 25);
        assert_eq!(buffer.processed_total(), 225);
    }
}
