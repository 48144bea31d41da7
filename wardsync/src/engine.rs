//! Queue drain engine
//!
//! Replays pending clinical writes against the remote service in enqueue
//! order. One pass per owner at a time (single-flight); one item's failure
//! never blocks the rest of the batch; a vital-signs success chains a
//! care-queue status transition before the next item is considered.

use crate::error::SyncResult;
use crate::network::NetworkMonitor;
use crate::queue::{OfflineQueue, QueueItem, RecordKind};
use crate::remote::{apply_item, ClinicalRecordService, CARE_QUEUE_READY_FOR_REVIEW};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Aggregate outcome of one sync pass. The UI surfaces this once per pass,
/// never per item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items removed from the queue this pass
    pub synced: usize,
    /// Items that failed and stay queued
    pub failed: usize,
    /// Pending count after the pass
    pub pending_after: i64,
}

impl SyncReport {
    /// One-line toast text for the pass
    pub fn summary(&self) -> String {
        if self.failed == 0 {
            format!("Synchronized {} records", self.synced)
        } else {
            format!(
                "Synchronized {} records, {} still pending",
                self.synced, self.pending_after
            )
        }
    }
}

pub struct SyncEngine {
    queue: Arc<OfflineQueue>,
    network: NetworkMonitor,
    service: Arc<dyn ClinicalRecordService>,
    /// Owners with a pass currently in flight
    in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OfflineQueue>,
        network: NetworkMonitor,
        service: Arc<dyn ClinicalRecordService>,
    ) -> Self {
        Self {
            queue,
            network,
            service,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Attempt to drain the queue for one caregiver.
    ///
    /// Returns `Ok(None)` without side effects when offline or when a pass
    /// for this owner is already in flight; later callers of a collapsed
    /// concurrent call do not re-drain. Once started, a pass runs to
    /// completion; there is no cancellation token.
    pub async fn trigger_sync(&self, owner_id: &str) -> SyncResult<Option<SyncReport>> {
        if !self.network.is_online() {
            tracing::debug!(owner_id = owner_id, "Sync skipped: offline");
            return Ok(None);
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(owner_id.to_string()) {
                tracing::debug!(owner_id = owner_id, "Sync skipped: pass already in flight");
                return Ok(None);
            }
        }

        let result = self.drain(owner_id).await;

        self.in_flight.lock().await.remove(owner_id);

        result.map(Some)
    }

    async fn drain(&self, owner_id: &str) -> SyncResult<SyncReport> {
        let items = self.queue.pending_items(owner_id).await?;
        let total = items.len();

        let mut synced = 0usize;
        let mut failed = 0usize;

        // Strictly sequential: an earlier item's remote effects (including
        // the chained transition) are committed before the next dispatch.
        for item in items {
            match apply_item(self.service.as_ref(), &item).await {
                Ok(()) => {
                    if item.kind == RecordKind::VitalSigns {
                        self.transition_care_queue(&item).await;
                    }
                    self.queue.remove_from_queue(item.id).await?;
                    synced += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = %item.id,
                        kind = item.kind.as_str(),
                        error = %e,
                        "Item replay failed; continuing with next item"
                    );
                    if let Err(db_err) = self.queue.record_failure(item.id, &e.to_string()).await {
                        tracing::warn!(item_id = %item.id, error = %db_err, "Could not record failure");
                    }
                    failed += 1;
                }
            }
        }

        let pending_after = self.queue.pending_count(owner_id).await?;

        tracing::info!(
            owner_id = owner_id,
            total = total,
            synced = synced,
            failed = failed,
            pending_after = pending_after,
            "Sync pass finished"
        );

        Ok(SyncReport {
            synced,
            failed,
            pending_after,
        })
    }

    /// Chained transition after a successful vital-signs write.
    ///
    /// The vital-signs record already reached the service, so a failure here
    /// is logged and not retried: re-enqueueing would risk a duplicate
    /// vital-signs record, which is worse than a status omission a human can
    /// correct.
    async fn transition_care_queue(&self, item: &QueueItem) {
        let Some(queue_id) = item.payload.get("queue_id").and_then(|v| v.as_str()) else {
            tracing::warn!(
                item_id = %item.id,
                "Vital-signs payload has no queue_id; skipping care-queue transition"
            );
            return;
        };

        if let Err(e) = self
            .service
            .update_queue_status(queue_id, CARE_QUEUE_READY_FOR_REVIEW)
            .await
        {
            tracing::warn!(
                item_id = %item.id,
                queue_id = queue_id,
                error = %e,
                "Care-queue transition failed after vital-signs sync; not retried"
            );
        }
    }
}
