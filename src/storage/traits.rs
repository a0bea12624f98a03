// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::alerting::{Alert, ContentMetadata, Severity};
use crate::ingest::queue::MetricRecord;
use crate::sentiment::{Label, Probabilities, ResultSource, SentimentResult};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored row could not be decoded: {0}")]
    Serialization(String),
    /// A non-atomic batch stopped partway: the first `written` items are stored
    #[error("Batch write stopped after {written} items: {source}")]
    Partial {
        written: usize,
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Wrap `source` as the failure of item `written` in a batch.
    pub fn partial(written: usize, source: StorageError) -> Self {
        if written == 0 {
            return source;
        }
        Self::Partial {
            written,
            source: Box::new(source),
        }
    }
}

/// Sentiment row as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSentiment {
    pub id: i64,
    pub text_hash: String,
    /// Stored preview, not the full text
    pub text: String,
    pub label: Label,
    pub confidence: f64,
    pub compound_score: f64,
    pub probabilities: Probabilities,
    pub processing_time_ms: f64,
    pub model_used: String,
    pub source: ResultSource,
    pub circuit_state: Option<String>,
    pub created_at: i64,
}

impl StoredSentiment {
    pub(crate) fn from_result(id: i64, result: &SentimentResult) -> Self {
        Self {
            id,
            text_hash: result.text_hash().to_string(),
            text: result.text().to_string(),
            label: result.label(),
            confidence: result.confidence(),
            compound_score: result.compound_score(),
            probabilities: result.probabilities(),
            processing_time_ms: result.processing_time_ms(),
            model_used: result.model_used().to_string(),
            source: result.source(),
            circuit_state: result.circuit_state().map(|s| s.to_string()),
            created_at: result.created_at(),
        }
    }
}

/// Alert row as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAlert {
    pub id: i64,
    pub content_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub priority: i32,
    pub keywords_found: Vec<String>,
    pub status: String,
    pub related_result_id: Option<i64>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub sentiments: u64,
    pub contents: u64,
    pub alerts: u64,
    pub metrics: u64,
}

/// Persistence boundary for the ingest worker.
///
/// Writes are idempotent where a natural key exists:
/// - sentiment results by `text_hash`
/// - content metadata by `content_id`
/// - alerts by `(content_id, alert_type)`
///
/// Inserting an existing key returns the id of the existing row.
#[async_trait]
pub trait SentimentStore: Send + Sync {
    /// Short backend name, used as a metrics label
    fn backend(&self) -> &'static str;

    async fn store_sentiment_result(&self, result: &SentimentResult) -> Result<i64, StorageError>;

    async fn store_content_metadata(
        &self,
        content: &ContentMetadata,
        related_result_id: Option<i64>,
    ) -> Result<i64, StorageError>;

    async fn store_alert(&self, alert: &Alert, related_result_id: Option<i64>) -> Result<i64, StorageError>;

    async fn store_metric(&self, metric: &MetricRecord) -> Result<i64, StorageError>;

    /// Write a group of results, returning ids in input order.
    /// Default implementation falls back to sequential writes.
    async fn store_sentiment_batch(&self, results: &[SentimentResult]) -> Result<Vec<i64>, StorageError> {
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            ids.push(self.store_sentiment_result(result).await?);
        }
        Ok(ids)
    }

    /// Write a group of alerts with their related result ids.
    async fn store_alert_batch(&self, alerts: &[(Alert, Option<i64>)]) -> Result<Vec<i64>, StorageError> {
        let mut ids = Vec::with_capacity(alerts.len());
        for (alert, related) in alerts {
            ids.push(self.store_alert(alert, *related).await?);
        }
        Ok(ids)
    }

    /// Write a group of metrics.
    ///
    /// Metrics have no natural key, so a replayed row is a duplicate. An
    /// implementation either writes the group atomically or reports how far
    /// it got with [`StorageError::Partial`].
    async fn store_metric_batch(&self, metrics: &[MetricRecord]) -> Result<usize, StorageError> {
        for (written, metric) in metrics.iter().enumerate() {
            if let Err(e) = self.store_metric(metric).await {
                return Err(StorageError::partial(written, e));
            }
        }
        Ok(metrics.len())
    }

    async fn find_result_id(&self, text_hash: &str) -> Result<Option<i64>, StorageError>;

    async fn fetch_sentiment(&self, text_hash: &str) -> Result<Option<StoredSentiment>, StorageError>;

    async fn fetch_alerts(&self, content_id: &str) -> Result<Vec<StoredAlert>, StorageError>;

    async fn counts(&self) -> Result<StoreCounts, StorageError>;
}
