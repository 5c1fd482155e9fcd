//! Per-id ordered sync queue.
//!
//! Events are sharded by a hash of the record id, so every event for one id
//! is handled by the same worker in submission order. Workers retry
//! transient failures with exponential backoff and jitter. A schema
//! mismatch is latched and reported by every later `flush` and by
//! `shutdown`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::random;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::eid::RecordId;
use crate::records::{ContentEdit, Feedback};
use crate::semantic::sync::{IndexSynchronizer, SyncError, SyncOutcome};

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Feedback { id: RecordId, feedback: Feedback },
    Edit(ContentEdit),
}

impl SyncEvent {
    pub fn id(&self) -> &RecordId {
        match self {
            SyncEvent::Feedback { id, .. } => id,
            SyncEvent::Edit(edit) => &edit.id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SyncEvent::Feedback { .. } => "feedback change",
            SyncEvent::Edit(_) => "content edit",
        }
    }

    async fn apply(&self, sync: &IndexSynchronizer) -> Result<SyncOutcome, SyncError> {
        match self {
            SyncEvent::Feedback { id, feedback } => sync.on_feedback_change(id, *feedback).await,
            SyncEvent::Edit(edit) => sync.on_content_edit(edit).await,
        }
    }
}

enum Command {
    Event(SyncEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sync queue is shut down")]
    Closed,

    #[error(transparent)]
    Sync(SyncError),
}

/// First fatal failure seen by any worker.
#[derive(Default)]
struct FatalLatch(Mutex<Option<String>>);

impl FatalLatch {
    fn record(&self, error: &SyncError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert_with(|| error.to_string());
        }
    }

    fn check(&self) -> Result<(), QueueError> {
        match self.0.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(message) => Err(QueueError::Sync(SyncError::SchemaMismatch(
                    message.clone(),
                ))),
                None => Ok(()),
            },
            Err(_) => Err(QueueError::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u8,
    base_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u8) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1) as u32));
        Duration::from_millis(exp + rand_jitter(base_ms))
    }
}

fn rand_jitter(base_ms: u64) -> u64 {
    random::<u64>() % (base_ms / 2 + 1)
}

fn shard_of(id: &RecordId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

pub struct SyncQueue {
    shards: Vec<mpsc::UnboundedSender<Command>>,
    workers: Vec<JoinHandle<()>>,
    sync: Arc<IndexSynchronizer>,
    fatal: Arc<FatalLatch>,
}

impl SyncQueue {
    /// Spawn the workers on the current tokio runtime.
    pub fn start(sync: Arc<IndexSynchronizer>, config: &SyncConfig) -> Self {
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        };

        let worker_count = config.workers.max(1) as usize;
        let mut shards = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        let fatal = Arc::new(FatalLatch::default());

        for shard in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            shards.push(tx);
            workers.push(tokio::spawn(run_worker(
                shard,
                rx,
                sync.clone(),
                fatal.clone(),
                policy,
            )));
        }

        log::debug!("sync queue started with {} workers", worker_count);
        Self {
            shards,
            workers,
            sync,
            fatal,
        }
    }

    /// Queue an event and return without waiting for it.
    pub fn submit(&self, event: SyncEvent) -> Result<(), QueueError> {
        let shard = shard_of(event.id(), self.shards.len());
        self.shards[shard]
            .send(Command::Event(event))
            .map_err(|_| QueueError::Closed)
    }

    /// Wait until every event submitted before this call is applied and
    /// the index is persisted.
    pub async fn flush(&self) -> Result<(), QueueError> {
        let mut pending = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            shard.send(Command::Flush(tx)).map_err(|_| QueueError::Closed)?;
            pending.push(rx);
        }

        for rx in pending {
            rx.await.map_err(|_| QueueError::Closed)?;
        }

        self.persist().await;
        self.fatal.check()
    }

    /// Drain queued events and stop the workers.
    pub async fn shutdown(mut self) -> Result<(), QueueError> {
        drop(std::mem::take(&mut self.shards));

        for worker in std::mem::take(&mut self.workers) {
            if let Err(err) = worker.await {
                log::error!("sync worker panicked: {err:?}");
            }
        }

        self.persist().await;
        self.fatal.check()
    }

    async fn persist(&self) {
        // a failed write leaves the store dirty for the next flush
        if let Err(e) = self.sync.index().flush().await {
            log::warn!("failed to persist index: {e}");
        }
    }
}

async fn run_worker(
    shard: usize,
    mut rx: mpsc::UnboundedReceiver<Command>,
    sync: Arc<IndexSynchronizer>,
    fatal: Arc<FatalLatch>,
    policy: RetryPolicy,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Event(event) => process(shard, &event, &sync, &fatal, policy).await,
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("sync worker {shard} stopped");
}

async fn process(
    shard: usize,
    event: &SyncEvent,
    sync: &IndexSynchronizer,
    fatal: &FatalLatch,
    policy: RetryPolicy,
) {
    let mut attempt = 0u8;

    loop {
        let result = event.apply(sync).await;

        match result {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                log::info!(
                    "worker {}: {} for {} failed: {}, retrying (attempt {}/{}) in {}ms",
                    shard,
                    event.name(),
                    event.id(),
                    e,
                    attempt,
                    policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                match IndexSynchronizer::settle(event.id(), event.name(), result) {
                    Ok(outcome) => {
                        log::debug!("worker {}: {} -> {:?}", shard, event.id(), outcome)
                    }
                    Err(e) => fatal.record(&e),
                }
                break;
            }
        }
    }
}
