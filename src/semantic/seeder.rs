//! Bulk seeder: rebuilds or repairs the index from the record store.
//!
//! Pages are processed one after another; records inside a page are
//! synchronized concurrently. Cancellation is checked between pages only,
//! and every write is an idempotent upsert or delete, so a run can be
//! repeated or resumed from its checkpoint.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;

use crate::eid::{PointId, RecordId};
use crate::records::ConversationRecord;
use crate::semantic::sync::{IndexSynchronizer, SyncError, SyncOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedMode {
    /// Scan every record: index positive ones, remove stale points of the
    /// rest, then prune points whose record is gone
    #[default]
    FullRepair,
    /// Scan positive records only and upsert them
    PositiveOnly,
}

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub batch_size: usize,
    pub mode: SeedMode,
    /// Page token to continue an interrupted run from
    pub resume_from: Option<String>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            mode: SeedMode::default(),
            resume_from: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub processed: usize,
    pub imported: usize,
    pub removed: usize,
    pub pruned: usize,
    pub failed_ids: Vec<RecordId>,
    /// Page token a resumed run starts from; `None` once the scan is complete
    pub checkpoint: Option<String>,
    pub cancelled: bool,
    pub batches: usize,
}

pub struct BulkSeeder {
    sync: Arc<IndexSynchronizer>,
    cancel: Arc<AtomicBool>,
}

impl BulkSeeder {
    pub fn new(sync: Arc<IndexSynchronizer>) -> Self {
        Self {
            sync,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run before the next page when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the seeder. `on_progress` is called after every page.
    ///
    /// Per-record failures are collected in the report; only a schema
    /// mismatch or a failure to list a page aborts the run.
    pub async fn run(
        &self,
        options: &SeedOptions,
        mut on_progress: impl FnMut(&SeedReport),
    ) -> Result<SeedReport, SyncError> {
        let started = Instant::now();
        let batch_size = options.batch_size.max(1);
        let records = self.sync.records();

        let mut report = SeedReport {
            checkpoint: options.resume_from.clone(),
            ..Default::default()
        };
        let mut token = options.resume_from.clone();
        let mut positive_ids: HashSet<PointId> = HashSet::new();

        log::info!(
            "seeding index ({:?}, batch size {}{})",
            options.mode,
            batch_size,
            token
                .as_deref()
                .map(|t| format!(", resuming from {t}"))
                .unwrap_or_default()
        );

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                log::info!("seeding cancelled after {} batches", report.batches);
                report.cancelled = true;
                break;
            }

            let page = match options.mode {
                SeedMode::FullRepair => records.list_records(token.as_deref(), batch_size).await?,
                SeedMode::PositiveOnly => {
                    records
                        .list_positive_records(token.as_deref(), batch_size)
                        .await?
                }
            };

            let results = join_all(
                page.records
                    .iter()
                    .map(|record| async move { (record, self.seed_one(record).await) }),
            )
            .await;

            for (record, result) in results {
                report.processed += 1;
                if record.feedback.is_positive() {
                    positive_ids.insert(record.id.point_id());
                }

                match result {
                    Ok(SyncOutcome::Upserted) => report.imported += 1,
                    Ok(SyncOutcome::Removed) => report.removed += 1,
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        log::error!("seeding aborted at record {}: {}", record.id, e);
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("failed to seed record {}: {}", record.id, e);
                        report.failed_ids.push(record.id.clone());
                    }
                }
            }

            // the checkpoint only advances past persisted work
            self.sync.index().flush().await?;

            report.batches += 1;
            report.checkpoint = page.next_token.clone();
            on_progress(&report);

            log::info!(
                "batch {}: processed={} imported={} failed={}",
                report.batches,
                report.processed,
                report.imported,
                report.failed_ids.len()
            );

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let full_scan = options.mode == SeedMode::FullRepair && options.resume_from.is_none();
        if full_scan && !report.cancelled {
            report.pruned = self.prune_orphans(&positive_ids).await?;
            self.sync.index().flush().await?;
        }

        log::info!(
            "seeding finished in {:.1}s: processed={} imported={} removed={} pruned={} failed={}",
            started.elapsed().as_secs_f64(),
            report.processed,
            report.imported,
            report.removed,
            report.pruned,
            report.failed_ids.len()
        );

        Ok(report)
    }

    async fn seed_one(&self, record: &ConversationRecord) -> Result<SyncOutcome, SyncError> {
        if record.feedback.is_positive() {
            self.sync.index_record(record).await
        } else {
            self.sync.remove(&record.id).await
        }
    }

    /// Delete points that no positive record maps to.
    async fn prune_orphans(&self, positive_ids: &HashSet<PointId>) -> Result<usize, SyncError> {
        let index = self.sync.index();

        let result = async {
            let orphans = index
                .list_ids()
                .await?
                .into_iter()
                .filter(|id| !positive_ids.contains(id))
                .collect::<Vec<_>>();
            index.delete(&orphans).await?;
            Ok::<_, SyncError>(orphans.len())
        }
        .await;

        match result {
            Ok(0) => Ok(0),
            Ok(pruned) => {
                log::info!("pruned {} orphaned points", pruned);
                Ok(pruned)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("skipping orphan pruning: {}", e);
                Ok(0)
            }
        }
    }
}
