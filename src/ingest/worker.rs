// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch worker: the single consumer of the ingest queue.
//!
//! # Flush cycle
//!
//! ```text
//! recv ──► batcher ──(count | timeout)──► group by kind
//!                                          ├─ sentiment results (+ content)
//!                                          ├─ alerts (related result resolved)
//!                                          └─ metrics
//! group write fails ──► per-item write ──► fails again ──► retry_count += 1
//!                                                          ├─ < max_retries: requeue
//!                                                          └─ otherwise: drop (terminal)
//! ```
//!
//! Sentiment groups are written before alerts so an alert flushed in the
//! same batch can link to its result row. When that result was requeued
//! instead, the alert is deferred behind it rather than stored unlinked.
//!
//! A metric batch that fails partway reports how many rows it wrote; only
//! the rest are retried, since a replayed metric would be a duplicate row.
//!
//! On shutdown the worker drains whatever is still buffered and flushes it
//! once; failures there are terminal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::queue::{IngestQueue, QueueItem, QueueKind, QueuePayload, QueueReceiver};
use crate::alerting::Alert;
use crate::batching::hybrid_batcher::{BatchConfig, FlushBatch, FlushReason, HybridBatcher};
use crate::sentiment::SentimentResult;
use crate::storage::traits::{SentimentStore, StorageError};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch: BatchConfig,
    /// Failed attempts after which an item is dropped
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            max_retries: 3,
        }
    }
}

/// Cumulative worker counters, shared with the engine for status reads.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    batches: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Items persisted
    pub processed: u64,
    /// Items dropped after exhausting retries
    pub failed: u64,
    /// Items requeued after a failed write
    pub retried: u64,
    /// Flushes performed
    pub batches: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

pub struct BatchWorker {
    store: Arc<dyn SentimentStore>,
    queue: IngestQueue,
    receiver: QueueReceiver,
    batcher: HybridBatcher<QueueItem>,
    max_retries: u32,
    stats: Arc<WorkerStats>,
    shutdown: watch::Receiver<bool>,
}

impl BatchWorker {
    /// `queue` must be the producer side of `receiver`; it is used to requeue.
    pub fn new(
        store: Arc<dyn SentimentStore>,
        queue: IngestQueue,
        receiver: QueueReceiver,
        config: WorkerConfig,
        stats: Arc<WorkerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queue,
            receiver,
            batcher: HybridBatcher::new(config.batch),
            max_retries: config.max_retries,
            stats,
            shutdown,
        }
    }

    /// Run until shutdown is signalled, then drain and hand the receiver back.
    pub async fn run(mut self) -> QueueReceiver {
        info!(
            backend = self.store.backend(),
            batch_size = self.batcher.config().flush_count,
            batch_timeout_ms = self.batcher.config().flush_ms,
            max_retries = self.max_retries,
            "Batch worker started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let wait = if self.batcher.is_empty() {
                self.batcher.config().flush_interval()
            } else {
                self.batcher.time_until_flush()
            };

            tokio::select! {
                biased;

                // Err means the engine was dropped: stop as well
                _ = self.shutdown.changed() => break,

                maybe_item = self.receiver.recv() => match maybe_item {
                    Some(item) => {
                        self.batcher.push(item);
                        if let Some(batch) = self.batcher.take_if_ready() {
                            self.flush(batch, true).await;
                        }
                    }
                    None => break,
                },

                _ = sleep(wait) => {
                    match self.batcher.take_if_ready() {
                        Some(batch) => self.flush(batch, true).await,
                        None => self.batcher.reset_window(),
                    }
                }
            }
        }

        self.drain().await;
        info!(stats = ?self.stats.snapshot(), "Batch worker stopped");
        self.receiver
    }

    /// Best-effort final flush of everything still buffered.
    async fn drain(&mut self) {
        let mut drained = 0usize;
        while let Some(item) = self.receiver.try_recv() {
            self.batcher.push(item);
            drained += 1;
        }
        if let Some(batch) = self.batcher.force_flush_with_reason(FlushReason::Shutdown) {
            info!(items = batch.items.len(), from_queue = drained, "Flushing remaining items on shutdown");
            self.flush(batch, false).await;
        }
    }

    /// Flush one batch, grouped by kind.
    async fn flush(&mut self, batch: FlushBatch<QueueItem>, allow_requeue: bool) {
        let start = Instant::now();
        let total = batch.items.len();

        let mut sentiments = Vec::new();
        let mut alerts = Vec::new();
        let mut metrics = Vec::new();
        for item in batch.items {
            match item.kind() {
                QueueKind::SentimentResult => sentiments.push(item),
                QueueKind::Alert => alerts.push(item),
                QueueKind::Metric => metrics.push(item),
            }
        }

        // text_hash → result id for rows written in this flush
        let mut result_ids: HashMap<String, i64> = HashMap::new();
        // text_hash of results requeued by this flush
        let mut pending: HashSet<String> = HashSet::new();

        if !sentiments.is_empty() {
            self.flush_group(QueueKind::SentimentResult, sentiments, &mut result_ids, &mut pending, allow_requeue)
                .await;
        }
        let alerts = self.defer_unlinked_alerts(alerts, &pending, &result_ids);
        for (kind, group) in [(QueueKind::Alert, alerts), (QueueKind::Metric, metrics)] {
            if !group.is_empty() {
                self.flush_group(kind, group, &mut result_ids, &mut pending, allow_requeue).await;
            }
        }

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_flush(batch.reason.as_str(), total, start.elapsed());
        crate::metrics::set_queue_depth(self.queue.depth());
        debug!(
            items = total,
            reason = batch.reason.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch flushed"
        );
    }

    async fn flush_group(
        &self,
        kind: QueueKind,
        group: Vec<QueueItem>,
        result_ids: &mut HashMap<String, i64>,
        pending: &mut HashSet<String>,
        allow_requeue: bool,
    ) {
        let err = match self.persist(kind, &group, result_ids).await {
            Ok(()) => {
                self.record_persisted(kind, group.len());
                return;
            }
            Err(e) => e,
        };

        // Only metric batches report progress; the other kinds replay safely
        let (written, err) = match err {
            StorageError::Partial { written, source } if kind == QueueKind::Metric => {
                (written.min(group.len()), *source)
            }
            other => (0, other),
        };
        if written > 0 {
            self.record_persisted(kind, written);
        }

        let group_len = group.len();
        let mut rest = group.into_iter().skip(written);
        if written > 0 || group_len == 1 {
            // The first remaining item is the one that failed
            if let Some(item) = rest.next() {
                self.settle_failure(item, err, allow_requeue, pending);
            }
        } else {
            warn!(
                kind = %kind,
                items = group_len,
                error = %err,
                "Group write failed, retrying items individually"
            );
        }

        for item in rest {
            match self.persist(kind, std::slice::from_ref(&item), result_ids).await {
                Ok(()) => self.record_persisted(kind, 1),
                Err(e) => self.settle_failure(item, e, allow_requeue, pending),
            }
        }
    }

    /// Requeue or drop a failed item, remembering requeued results.
    fn settle_failure(&self, item: QueueItem, err: StorageError, allow_requeue: bool, pending: &mut HashSet<String>) {
        let hash = match &item.payload {
            QueuePayload::Sentiment { result, .. } => Some(result.text_hash().to_string()),
            _ => None,
        };
        if self.retry_or_drop(item, err, allow_requeue) {
            if let Some(hash) = hash {
                pending.insert(hash);
            }
        }
    }

    /// Send alerts whose result was requeued back behind it.
    ///
    /// A deferred alert keeps its retry count. If the queue has no room it is
    /// written now, without a result link.
    fn defer_unlinked_alerts(
        &self,
        alerts: Vec<QueueItem>,
        pending: &HashSet<String>,
        result_ids: &HashMap<String, i64>,
    ) -> Vec<QueueItem> {
        if pending.is_empty() {
            return alerts;
        }

        let mut ready = Vec::with_capacity(alerts.len());
        for item in alerts {
            let waiting = match &item.payload {
                QueuePayload::Alert(alert) => {
                    pending.contains(&alert.text_hash) && !result_ids.contains_key(&alert.text_hash)
                }
                _ => false,
            };
            if !waiting {
                ready.push(item);
                continue;
            }
            match self.queue.defer(item) {
                Ok(()) => debug!(kind = %QueueKind::Alert, "Alert deferred until its result is stored"),
                Err(item) => {
                    warn!(kind = %QueueKind::Alert, "No room to defer alert, storing it unlinked");
                    ready.push(item);
                }
            }
        }
        ready
    }

    fn record_persisted(&self, kind: QueueKind, count: usize) {
        self.stats.processed.fetch_add(count as u64, Ordering::Relaxed);
        crate::metrics::record_persisted(kind.as_str(), count);
    }

    /// Write `items` (all of `kind`) to the store.
    async fn persist(
        &self,
        kind: QueueKind,
        items: &[QueueItem],
        result_ids: &mut HashMap<String, i64>,
    ) -> Result<(), StorageError> {
        match kind {
            QueueKind::SentimentResult => {
                let results: Vec<SentimentResult> = items
                    .iter()
                    .filter_map(|item| match &item.payload {
                        QueuePayload::Sentiment { result, .. } => Some(result.clone()),
                        _ => None,
                    })
                    .collect();
                let ids = self.store.store_sentiment_batch(&results).await?;
                for (result, id) in results.iter().zip(&ids) {
                    result_ids.insert(result.text_hash().to_string(), *id);
                }

                for (item, id) in items.iter().zip(ids) {
                    if let QueuePayload::Sentiment { content: Some(content), .. } = &item.payload {
                        self.store.store_content_metadata(content, Some(id)).await?;
                    }
                }
                Ok(())
            }
            QueueKind::Alert => {
                let mut rows: Vec<(Alert, Option<i64>)> = Vec::with_capacity(items.len());
                for item in items {
                    if let QueuePayload::Alert(alert) = &item.payload {
                        let related = match result_ids.get(&alert.text_hash) {
                            Some(id) => Some(*id),
                            None => self.store.find_result_id(&alert.text_hash).await?,
                        };
                        rows.push((alert.clone(), related));
                    }
                }
                self.store.store_alert_batch(&rows).await?;
                Ok(())
            }
            QueueKind::Metric => {
                let records: Vec<_> = items
                    .iter()
                    .filter_map(|item| match &item.payload {
                        QueuePayload::Metric(metric) => Some(metric.clone()),
                        _ => None,
                    })
                    .collect();
                self.store.store_metric_batch(&records).await?;
                Ok(())
            }
        }
    }

    /// Returns whether the item went back on the queue.
    fn retry_or_drop(&self, mut item: QueueItem, err: StorageError, allow_requeue: bool) -> bool {
        let kind = item.kind();
        item.retry_count += 1;

        if allow_requeue && item.retry_count < self.max_retries {
            let retry_count = item.retry_count;
            match self.queue.requeue(item) {
                Ok(()) => {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_retry(kind.as_str());
                    warn!(kind = %kind, retry_count, error = %err, "Item write failed, requeued");
                    return true;
                }
                Err(rejected) => {
                    let item = rejected.into_item();
                    self.drop_terminal(kind, item.retry_count, &err, "requeue rejected");
                    return false;
                }
            }
        }

        let reason = if allow_requeue { "retries exhausted" } else { "shutdown flush" };
        self.drop_terminal(kind, item.retry_count, &err, reason);
        false
    }

    fn drop_terminal(&self, kind: QueueKind, retry_count: u32, err: &StorageError, reason: &str) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_terminal_drop(kind.as_str());
        error!(
            kind = %kind,
            retry_count,
            reason,
            error = %err,
            "Dropping item after persistence failure"
        );
    }
}
