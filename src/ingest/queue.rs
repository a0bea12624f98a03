// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded ingest queue.
//!
//! Producers (every classification caller) push [`QueueItem`]s with
//! [`IngestQueue::enqueue`], which never waits: when the buffer is full the
//! item is handed back in [`EnqueueError::Full`] and counted as dropped.
//! A single [`BatchWorker`](super::worker::BatchWorker) owns the
//! [`QueueReceiver`] and is the only consumer.
//!
//! No ordering is promised across producers. Sentiment rows are
//! deduplicated by text hash at the storage boundary, so replays are safe.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::alerting::{Alert, ContentMetadata};
use crate::backpressure::BackpressureLevel;
use crate::sentiment::{now_millis, SentimentResult};

/// Discriminant of a [`QueuePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    SentimentResult,
    Alert,
    Metric,
}

impl QueueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SentimentResult => "sentiment_result",
            Self::Alert => "alert",
            Self::Metric => "metric",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named measurement persisted alongside results (e.g. request latency).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub recorded_at: i64,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            recorded_at: now_millis(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum QueuePayload {
    /// A classification, optionally with the content it was computed from
    Sentiment {
        result: SentimentResult,
        content: Option<ContentMetadata>,
    },
    Alert(Alert),
    Metric(MetricRecord),
}

/// Envelope placed on the ingest queue.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub payload: QueuePayload,
    /// Failed persistence attempts so far
    pub retry_count: u32,
    pub enqueued_at: i64,
}

impl QueueItem {
    pub fn new(payload: QueuePayload) -> Self {
        Self {
            payload,
            retry_count: 0,
            enqueued_at: now_millis(),
        }
    }

    pub fn sentiment(result: SentimentResult, content: Option<ContentMetadata>) -> Self {
        Self::new(QueuePayload::Sentiment { result, content })
    }

    pub fn alert(alert: Alert) -> Self {
        Self::new(QueuePayload::Alert(alert))
    }

    pub fn metric(metric: MetricRecord) -> Self {
        Self::new(QueuePayload::Metric(metric))
    }

    pub fn kind(&self) -> QueueKind {
        match self.payload {
            QueuePayload::Sentiment { .. } => QueueKind::SentimentResult,
            QueuePayload::Alert(_) => QueueKind::Alert,
            QueuePayload::Metric(_) => QueueKind::Metric,
        }
    }
}

/// Enqueue rejected; the item is handed back to the caller.
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("ingest queue full ({kind} dropped)", kind = .0.kind())]
    Full(QueueItem),
    #[error("ingest queue closed ({kind} dropped)", kind = .0.kind())]
    Closed(QueueItem),
}

impl EnqueueError {
    pub fn into_item(self) -> QueueItem {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    /// Items accepted from producers
    pub enqueued: u64,
    /// Items put back by the worker after a failed write
    pub requeued: u64,
    /// Items rejected because the queue was full or closed
    pub dropped: u64,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<QueueItem>,
    capacity: usize,
    counters: Arc<QueueCounters>,
}

/// Consumer half, owned by exactly one worker at a time.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueItem>,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                counters: Arc::new(QueueCounters::default()),
            },
            QueueReceiver { rx },
        )
    }

    /// Add an item without waiting.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), EnqueueError> {
        let kind = item.kind();
        self.push(item)?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_enqueue(kind.as_str());
        Ok(())
    }

    /// Put an item back after a failed persistence attempt.
    pub(crate) fn requeue(&self, item: QueueItem) -> Result<(), EnqueueError> {
        self.push(item)?;
        self.counters.requeued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Put an item back to be written after items already queued.
    ///
    /// Unlike [`requeue`](Self::requeue) a full queue is not a loss here: the
    /// item is handed back for the caller to write now.
    pub(crate) fn defer(&self, item: QueueItem) -> Result<(), QueueItem> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(item)) | Err(mpsc::error::TrySendError::Closed(item)) => Err(item),
        }
    }

    fn push(&self, item: QueueItem) -> Result<(), EnqueueError> {
        let result = match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(item)) => {
                warn!(
                    kind = %item.kind(),
                    capacity = self.capacity,
                    data_loss = true,
                    "Ingest queue full, dropping item"
                );
                Err(EnqueueError::Full(item))
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                warn!(kind = %item.kind(), data_loss = true, "Ingest queue closed, dropping item");
                Err(EnqueueError::Closed(item))
            }
        };

        if let Err(ref err) = result {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match err {
                EnqueueError::Full(_) => "full",
                EnqueueError::Closed(_) => "closed",
            };
            let kind = match err {
                EnqueueError::Full(item) | EnqueueError::Closed(item) => item.kind(),
            };
            crate::metrics::record_enqueue_drop(kind.as_str(), reason);
        }
        crate::metrics::set_queue_depth(self.depth());
        result
    }

    /// Items currently buffered
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn backpressure(&self) -> BackpressureLevel {
        BackpressureLevel::from_queue(self.depth(), self.capacity)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth(),
            capacity: self.capacity,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl QueueReceiver {
    /// Wait for the next item. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Next item if one is buffered right now.
    pub fn try_recv(&mut self) -> Option<QueueItem> {
        self.rx.try_recv().ok()
    }
}
