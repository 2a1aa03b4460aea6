use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::analytics::AnalyticsCache;
use crate::usage::store::{StoreError, UsageStore};
use crate::usage::{UsageDraft, UsageRecord, ValidationError};

/// Maximum number of records to buffer before flushing, regardless of timer.
const BATCH_SIZE: usize = 100;

/// How often to flush buffered records even if the batch is not full.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Most records held while the store is failing. Beyond this the oldest
/// records are dropped (and logged) so an outage cannot exhaust memory.
const MAX_BUFFERED: usize = BATCH_SIZE * 10;

/// Why a usage record could not be recorded.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid usage metadata: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to persist usage record: {0}")]
    Persistence(#[from] StoreError),

    #[error("usage writer task failed: {0}")]
    Task(String),
}

/// Validates usage metadata and writes one [`UsageRecord`] per request.
///
/// Two write paths share the same validation:
/// - [`record`](Self::record) writes synchronously and surfaces store errors.
/// - [`enqueue`](Self::enqueue) hands the record to the background writer
///   (see [`spawn_usage_writer`]), which batches and retries failed flushes.
///
/// Every successful write invalidates the analytics cache.
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
    cache: Arc<AnalyticsCache>,
    queue: Option<mpsc::UnboundedSender<UsageRecord>>,
}

impl UsageRecorder {
    /// Recorder without a background writer; `enqueue` writes directly.
    pub fn new(store: Arc<dyn UsageStore>, cache: Arc<AnalyticsCache>) -> Self {
        Self {
            store,
            cache,
            queue: None,
        }
    }

    /// Recorder whose `enqueue` goes through a freshly spawned background
    /// writer. The writer exits once every clone of the recorder is dropped.
    pub fn with_writer(
        store: Arc<dyn UsageStore>,
        cache: Arc<AnalyticsCache>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_usage_writer(store.clone(), cache.clone(), rx);
        let recorder = Self {
            store,
            cache,
            queue: Some(tx),
        };
        (recorder, handle)
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    /// Validate and durably store a record, returning it once written.
    pub async fn record(&self, draft: UsageDraft) -> Result<UsageRecord, RecordError> {
        let record = draft.validate()?;
        self.write(record.clone()).await?;
        Ok(record)
    }

    /// Validate and queue a record for the background writer.
    ///
    /// Validation errors are returned immediately. If no writer is running
    /// (or it has shut down) the record is written directly instead.
    pub async fn enqueue(&self, draft: UsageDraft) -> Result<UsageRecord, RecordError> {
        let record = draft.validate()?;

        if let Some(ref tx) = self.queue {
            match tx.send(record.clone()) {
                Ok(()) => return Ok(record),
                Err(mpsc::error::SendError(unsent)) => {
                    tracing::warn!(id = %unsent.id, "Usage writer closed, writing directly");
                }
            }
        }

        self.write(record.clone()).await?;
        Ok(record)
    }

    /// Read a record back by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<UsageRecord>, RecordError> {
        let store = self.store.clone();
        let found = tokio::task::spawn_blocking(move || store.get(id))
            .await
            .map_err(|e| RecordError::Task(e.to_string()))??;
        Ok(found)
    }

    async fn write(&self, record: UsageRecord) -> Result<(), RecordError> {
        let store = self.store.clone();
        let id = record.id;
        let result = tokio::task::spawn_blocking(move || store.insert(&record))
            .await
            .map_err(|e| RecordError::Task(e.to_string()))?;

        match result {
            Ok(()) => {
                self.cache.invalidate();
                tracing::debug!(%id, "Usage record written");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%id, error = %e, "Failed to persist usage record");
                Err(e.into())
            }
        }
    }
}

/// Spawn a background task that reads records from the channel and
/// batch-writes them to the store, one transaction per batch.
///
/// A failed flush keeps the batch buffered. Until a flush succeeds again,
/// retries happen only on the timer tick, and the buffer is capped at
/// `MAX_BUFFERED`. The task exits when the sender half is dropped and the
/// remaining records are flushed (or the final flush fails, which is logged).
pub fn spawn_usage_writer(
    store: Arc<dyn UsageStore>,
    cache: Arc<AnalyticsCache>,
    mut rx: mpsc::UnboundedReceiver<UsageRecord>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<UsageRecord> = Vec::with_capacity(BATCH_SIZE);
        let mut failing = false;
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        // Don't pile up ticks while we're busy flushing.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(r) => {
                            buffer.push(r);
                            if failing {
                                cap_buffer(&mut buffer);
                            } else if buffer.len() >= BATCH_SIZE {
                                failing = !flush_batch(store.as_ref(), &cache, &mut buffer);
                            }
                        }
                        None => {
                            // Channel closed -- flush remaining and exit.
                            if !buffer.is_empty() {
                                flush_batch(store.as_ref(), &cache, &mut buffer);
                            }
                            if !buffer.is_empty() {
                                tracing::error!(
                                    count = buffer.len(),
                                    "Usage writer exiting with unflushed records"
                                );
                            }
                            tracing::info!("Usage writer shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        failing = !flush_batch(store.as_ref(), &cache, &mut buffer);
                    }
                }
            }
        }
    })
}

/// Write a batch of records in a single transaction. On failure the records
/// stay in `buffer` and `false` is returned.
fn flush_batch(
    store: &dyn UsageStore,
    cache: &AnalyticsCache,
    buffer: &mut Vec<UsageRecord>,
) -> bool {
    let records = std::mem::take(buffer);
    let count = records.len();

    if let Err(e) = store.insert_batch(&records) {
        tracing::error!(count, error = %e, "Failed to flush usage batch");
        // Put records back so we can retry on the next tick.
        buffer.extend(records);
        false
    } else {
        cache.invalidate();
        tracing::debug!(count, "Flushed usage batch");
        true
    }
}

/// Drop the oldest records beyond `MAX_BUFFERED`.
fn cap_buffer(buffer: &mut Vec<UsageRecord>) {
    if buffer.len() > MAX_BUFFERED {
        let excess = buffer.len() - MAX_BUFFERED;
        buffer.drain(..excess);
        tracing::error!(dropped = excess, "Usage buffer full, dropping oldest records");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
