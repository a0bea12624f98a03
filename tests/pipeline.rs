// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end tests for the sentiment engine.
//!
//! Everything runs in-process: the remote backend is replaced by scripted
//! classifiers and persistence by in-memory or failure-injecting stores.
//!
//! Run with: `cargo test --test pipeline`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sentiment_engine::{
    Alert, AlertEngine, AlertType, CircuitConfig, CircuitState, ClientConfig, ContentMetadata, ContentType,
    EngineState, EnqueueError, FailsafeClient, InMemoryStore, InferenceError, Label, LexiconClassifier,
    MetricRecord, Persistence, QueueItem, QueueKind, RemoteClassifier, ResultSource, SentimentEngine,
    SentimentEngineConfig, SentimentResult, SentimentStore, Severity, StorageError, StoreCounts, StoredAlert,
    StoredSentiment,
};

// =============================================================================
// Test doubles
// =============================================================================

/// Remote backend that is always down.
struct DownRemote {
    calls: AtomicU64,
}

#[async_trait]
impl RemoteClassifier for DownRemote {
    fn name(&self) -> &str {
        "down"
    }

    async fn try_classify(&self, _text: &str, _timeout: Duration) -> Result<SentimentResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InferenceError::Connect("connection refused".into()))
    }
}

/// Store whose every write fails.
struct BrokenStore {
    writes: AtomicU64,
}

#[async_trait]
impl SentimentStore for BrokenStore {
    fn backend(&self) -> &'static str {
        "broken"
    }

    async fn store_sentiment_result(&self, _result: &SentimentResult) -> Result<i64, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Backend("disk full".into()))
    }

    async fn store_content_metadata(&self, _c: &ContentMetadata, _r: Option<i64>) -> Result<i64, StorageError> {
        Err(StorageError::Backend("disk full".into()))
    }

    async fn store_alert(&self, _alert: &Alert, _r: Option<i64>) -> Result<i64, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Backend("disk full".into()))
    }

    async fn store_metric(&self, _metric: &MetricRecord) -> Result<i64, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Backend("disk full".into()))
    }

    async fn find_result_id(&self, _text_hash: &str) -> Result<Option<i64>, StorageError> {
        Ok(None)
    }

    async fn fetch_sentiment(&self, _text_hash: &str) -> Result<Option<StoredSentiment>, StorageError> {
        Ok(None)
    }

    async fn fetch_alerts(&self, _content_id: &str) -> Result<Vec<StoredAlert>, StorageError> {
        Ok(Vec::new())
    }

    async fn counts(&self) -> Result<StoreCounts, StorageError> {
        Ok(StoreCounts::default())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config(queue_capacity: usize) -> SentimentEngineConfig {
    SentimentEngineConfig {
        queue_capacity,
        batch_size: 10,
        batch_timeout_ms: 20,
        max_retries: 3,
        ..Default::default()
    }
}

fn engine_with(
    config: SentimentEngineConfig,
    remote: Option<Arc<dyn RemoteClassifier>>,
    store: Arc<dyn SentimentStore>,
) -> SentimentEngine {
    let client = FailsafeClient::new(
        remote,
        Arc::new(LexiconClassifier::new(config.lexicon_config())),
        ClientConfig {
            circuit: CircuitConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
            ..config.client_config()
        },
    );
    SentimentEngine::with_components(config, client, store, AlertEngine::default())
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn crisis_post_with_open_breaker_is_flagged_and_persisted() {
    let remote = Arc::new(DownRemote { calls: AtomicU64::new(0) });
    let store = Arc::new(InMemoryStore::new());
    let engine = engine_with(config(100), Some(remote.clone()), store.clone());
    engine.start().unwrap();

    // Two failed calls trip the breaker
    engine.predict("warm up one").await;
    engine.predict("warm up two").await;
    assert_eq!(engine.status().circuit.state, CircuitState::Open);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

    let text = "I feel completely hopeless and want to end it all";
    let analysis = engine
        .analyze(ContentMetadata::new("t3_crisis", text, ContentType::Post).with_subreddit("college"))
        .await;

    // Served by the fallback without touching the remote
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    assert_eq!(analysis.result.source(), ResultSource::Fallback);
    assert_eq!(analysis.result.label(), Label::Negative);
    assert_eq!(analysis.result.circuit_state(), Some(CircuitState::Open));

    let alert = analysis.alert.expect("alert raised");
    assert_eq!(alert.alert_type, AlertType::MentalHealth);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.priority, 4);
    assert_eq!(analysis.persistence, Persistence::Enqueued);

    engine.stop().await.unwrap();

    let result_id = store.find_result_id(analysis.result.text_hash()).await.unwrap();
    assert!(result_id.is_some());
    let alerts = store.fetch_alerts("t3_crisis").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].related_result_id, result_id);
    assert_eq!(store.content("t3_crisis").map(|c| c.related_result_id), Some(result_id));
}

#[tokio::test]
async fn full_queue_rejects_without_blocking_and_keeps_accepted_items() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine_with(config(3), None, store.clone());

    let mut rejected = Vec::new();
    for i in 0..5 {
        match engine.enqueue(QueueItem::metric(MetricRecord::new(format!("m{}", i), i as f64))) {
            Ok(()) => {}
            Err(EnqueueError::Full(item)) => rejected.push(item),
            Err(other) => panic!("unexpected enqueue error: {}", other),
        }
    }
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|item| item.kind() == QueueKind::Metric));

    let status = engine.status();
    assert_eq!(status.queue.depth, 3);
    assert_eq!(status.queue.dropped, 2);
    assert!(status.backpressure.is_degraded());

    // Classification still works while the queue is full
    let analysis = engine.analyze_text("lovely weather").await;
    assert_eq!(analysis.result.label(), Label::Positive);
    assert_eq!(analysis.persistence, Persistence::Dropped { kinds: vec![QueueKind::SentimentResult] });

    engine.start().unwrap();
    engine.stop().await.unwrap();

    for name in ["m0", "m1", "m2"] {
        assert_eq!(store.metrics_named(name).len(), 1, "{} persisted", name);
    }
    for name in ["m3", "m4"] {
        assert!(store.metrics_named(name).is_empty(), "{} must not be persisted", name);
    }
    assert_eq!(store.counts().await.unwrap().sentiments, 0);
}

#[tokio::test]
async fn repeated_text_is_stored_once() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine_with(config(100), None, store.clone());
    engine.start().unwrap();

    for id in ["c1", "c2", "c3"] {
        engine
            .analyze(ContentMetadata::new(id, "same text every time", ContentType::Comment))
            .await;
    }
    engine.stop().await.unwrap();

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.sentiments, 1);
    assert_eq!(counts.contents, 3);

    let id = store.find_result_id(&sentiment_engine::sentiment::text_hash("same text every time")).await.unwrap();
    for content in ["c1", "c2", "c3"] {
        assert_eq!(store.content(content).and_then(|c| c.related_result_id), id);
    }
}

#[tokio::test]
async fn failing_store_retries_then_drops_without_blocking_callers() {
    let store = Arc::new(BrokenStore { writes: AtomicU64::new(0) });
    let engine = engine_with(config(100), None, store.clone());
    engine.start().unwrap();

    let analysis = engine.analyze_text("nothing alarming here").await;
    assert!(analysis.alert.is_none());
    assert!(analysis.persistence.is_enqueued());

    wait_for(|| engine.status().worker.failed == 1).await;

    // Callers are unaffected by the failing store
    let result = engine.predict("still answering").await;
    assert_eq!(result.source(), ResultSource::Fallback);

    let stats = engine.stop().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.processed, 0);
    assert_eq!(store.writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_callers_all_complete() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(engine_with(config(1_000), None, store.clone()));
    engine.start().unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .analyze(ContentMetadata::new(format!("c{}", i), format!("post number {} is great", i % 10), ContentType::Post))
                .await
        }));
    }
    for handle in handles {
        let analysis = handle.await.unwrap();
        assert_eq!(analysis.result.label(), Label::Positive);
        assert!(analysis.persistence.is_enqueued());
    }

    let stats = engine.stop().await.unwrap();
    assert_eq!(stats.processed, 50);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.sentiments, 10);
    assert_eq!(counts.contents, 50);
}

#[tokio::test]
async fn status_reports_lifecycle_breaker_and_counters() {
    let remote: Arc<dyn RemoteClassifier> = Arc::new(DownRemote { calls: AtomicU64::new(0) });
    let engine = engine_with(config(100), Some(remote), Arc::new(InMemoryStore::new()));

    let status = engine.status();
    assert_eq!(status.state, EngineState::Created);
    assert!(status.remote_configured);
    assert_eq!(status.store_backend, "memory");

    engine.start().unwrap();
    let batch = engine.predict_batch(&["one", "two", "three"]).await;
    assert_eq!(batch.summary.sources.fallback, 3);
    assert_eq!(batch.summary.failed, 0);

    let status = engine.status();
    assert_eq!(status.state, EngineState::Running);
    assert_eq!(status.circuit.state, CircuitState::Open);
    assert_eq!(status.circuit.failure_count, 2);
    assert_eq!(status.circuit.rejections, 1);
    assert!(!status.is_healthy());

    engine.analyze_text("anything").await;
    engine.stop().await.unwrap();

    let status = engine.status();
    assert_eq!(status.state, EngineState::Stopped);
    assert_eq!(status.worker.processed, 1);
    assert_eq!(status.queue.depth, 0);
    assert_eq!(status.queue.enqueued, 1);
}
