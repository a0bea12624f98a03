// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Prediction and analysis API.
//!
//! - `predict()` / `predict_batch()` - classification only, nothing persisted
//! - `analyze()` - classify, detect alerts, enqueue for persistence
//! - `analyze_batch()` - `analyze()` per item plus a summary
//! - `record_metric()` / `enqueue()` - direct queue access

use std::time::Instant;

use tracing::{debug, warn};

use crate::alerting::ContentMetadata;
use crate::client::{BatchPrediction, BatchSummary};
use crate::ingest::queue::{EnqueueError, MetricRecord, QueueItem};
use crate::metrics::LatencyTimer;
use crate::sentiment::SentimentResult;

use super::{Analysis, AnalysisBatch, Persistence, SentimentEngine};

impl SentimentEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Classification
    // ═══════════════════════════════════════════════════════════════════════════

    /// Classify one text. Never fails; degradation shows in
    /// `source`, `model_used` and `circuit_state`.
    pub async fn predict(&self, text: &str) -> SentimentResult {
        self.client.predict(text).await
    }

    /// Classify many texts with the same per-item policy.
    pub async fn predict_batch<S: AsRef<str>>(&self, texts: &[S]) -> BatchPrediction {
        self.client.predict_batch(texts).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Analysis (classify → detect → enqueue)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run the full flow for one piece of content.
    ///
    /// The result and any alert are returned even when the queue rejects
    /// them; `persistence` reports what was dropped.
    pub async fn analyze(&self, content: ContentMetadata) -> Analysis {
        let _timer = LatencyTimer::new("analyze");

        let result = self.client.predict(&content.text).await;
        let alert = self.alerts.detect(&content, &result);

        let mut dropped = Vec::new();
        let alert_item = alert.clone().map(QueueItem::alert);

        if let Err(e) = self.queue.enqueue(QueueItem::sentiment(result.clone(), Some(content))) {
            dropped.push(e.into_item().kind());
        }
        if let Some(item) = alert_item {
            if let Err(e) = self.queue.enqueue(item) {
                dropped.push(e.into_item().kind());
            }
        }

        let persistence = if dropped.is_empty() {
            Persistence::Enqueued
        } else {
            warn!(
                text_hash = result.text_hash(),
                dropped = ?dropped,
                "Analysis returned without persistence"
            );
            Persistence::Dropped { kinds: dropped }
        };

        debug!(
            label = %result.label(),
            source = %result.source(),
            alert = alert.as_ref().map(|a| a.alert_type.as_str()),
            "Content analyzed"
        );

        Analysis { result, alert, persistence }
    }

    /// Analyze free text submitted through the API (generated content id).
    pub async fn analyze_text(&self, text: &str) -> Analysis {
        self.analyze(ContentMetadata::api_request(text)).await
    }

    /// Analyze each item in order and summarize the classifications.
    pub async fn analyze_batch(&self, contents: Vec<ContentMetadata>) -> AnalysisBatch {
        let start = Instant::now();
        let mut analyses = Vec::with_capacity(contents.len());
        for content in contents {
            analyses.push(self.analyze(content).await);
        }

        let results: Vec<SentimentResult> = analyses.iter().map(|a| a.result.clone()).collect();
        crate::metrics::record_batch_prediction(results.len());

        AnalysisBatch {
            summary: BatchSummary::from_results(&results, start.elapsed()),
            alerts_raised: analyses.iter().filter(|a| a.alert.is_some()).count(),
            dropped: analyses.iter().filter(|a| !a.persistence.is_enqueued()).count(),
            analyses,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Direct queue access
    // ═══════════════════════════════════════════════════════════════════════════

    /// Queue a named measurement for persistence.
    pub fn record_metric<I, K, V>(&self, name: &str, value: f64, labels: I) -> Result<(), EnqueueError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = labels
            .into_iter()
            .fold(MetricRecord::new(name, value), |record, (k, v)| record.with_label(k, v));
        self.queue.enqueue(QueueItem::metric(record))
    }

    /// Queue a prebuilt item. Fails fast when the queue is full.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), EnqueueError> {
        self.queue.enqueue(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{AlertEngine, AlertType, ContentType, Severity};
    use crate::classifier::lexicon::LexiconClassifier;
    use crate::client::FailsafeClient;
    use crate::config::SentimentEngineConfig;
    use crate::ingest::queue::QueueKind;
    use crate::sentiment::{Label, ResultSource};
    use crate::storage::memory::InMemoryStore;
    use std::sync::Arc;

    fn engine_with_capacity(capacity: usize) -> (SentimentEngine, Arc<InMemoryStore>) {
        let config = SentimentEngineConfig {
            queue_capacity: capacity,
            batch_timeout_ms: 20,
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let client = FailsafeClient::fallback_only(Arc::new(LexiconClassifier::default()), config.client_config());
        let engine = SentimentEngine::with_components(config, client, store.clone(), AlertEngine::default());
        (engine, store)
    }

    #[tokio::test]
    async fn test_predict_does_not_enqueue() {
        let (engine, _store) = engine_with_capacity(10);
        let result = engine.predict("a wonderful afternoon").await;

        assert_eq!(result.label(), Label::Positive);
        assert_eq!(engine.status().queue.depth, 0);
    }

    #[tokio::test]
    async fn test_analyze_enqueues_result_and_alert() {
        let (engine, _store) = engine_with_capacity(10);
        let analysis = engine
            .analyze(ContentMetadata::new("p1", "I feel hopeless", ContentType::Post).with_subreddit("college"))
            .await;

        let alert = analysis.alert.expect("alert raised");
        assert_eq!(alert.alert_type, AlertType::MentalHealth);
        assert!(alert.severity >= Severity::Medium);
        assert_eq!(alert.subreddit.as_deref(), Some("college"));
        assert_eq!(analysis.persistence, Persistence::Enqueued);
        assert_eq!(engine.status().queue.depth, 2);
    }

    #[tokio::test]
    async fn test_full_queue_reports_dropped_kinds() {
        let (engine, _store) = engine_with_capacity(1);

        let first = engine.analyze_text("I feel hopeless").await;
        assert_eq!(first.persistence, Persistence::Dropped { kinds: vec![QueueKind::Alert] });

        let second = engine.analyze_text("just a note").await;
        assert_eq!(second.persistence, Persistence::Dropped { kinds: vec![QueueKind::SentimentResult] });
        // Classification is still returned
        assert_eq!(second.result.source(), ResultSource::Fallback);

        let status = engine.status();
        assert_eq!(status.queue.depth, 1);
        assert_eq!(status.queue.dropped, 2);
    }

    #[tokio::test]
    async fn test_analyze_batch_summary() {
        let (engine, _store) = engine_with_capacity(100);
        let batch = engine
            .analyze_batch(vec![
                ContentMetadata::api_request("this is great"),
                ContentMetadata::api_request("exam tomorrow and I'm so stressed"),
                ContentMetadata::api_request("meh"),
            ])
            .await;

        assert_eq!(batch.analyses.len(), 3);
        assert_eq!(batch.summary.total, 3);
        assert_eq!(batch.summary.failed, 0);
        assert_eq!(batch.summary.majority_source, Some(ResultSource::Fallback));
        assert_eq!(batch.alerts_raised, 1);
        assert_eq!(batch.dropped, 0);
    }

    #[tokio::test]
    async fn test_record_metric_is_persisted() {
        let (engine, store) = engine_with_capacity(10);
        engine.record_metric("api_latency_ms", 12.5, [("endpoint", "predict")]).unwrap();

        engine.start().unwrap();
        engine.stop().await.unwrap();

        let stored = store.metrics_named("api_latency_ms");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].labels.get("endpoint").map(String::as_str), Some("predict"));
    }
}
