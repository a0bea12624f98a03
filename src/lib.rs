// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Sentiment Engine
//!
//! Sentiment classification that stays available when its inference
//! backend does not, plus keyword-driven safety alerts and batched
//! persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Failsafe Client                         │
//! │  • Remote inference adapter behind a circuit breaker        │
//! │  • Lexicon fallback, neutral emergency default              │
//! │  • predict() never fails                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Alerting Engine                         │
//! │  • Ordered keyword table (mental_health first)              │
//! │  • Severity from compound score, escalation rules           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (non-blocking enqueue)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Ingest Queue & Batch Worker                   │
//! │  • Bounded queue, fail-fast when full                       │
//! │  • Count/time batching, grouped by kind                     │
//! │  • Per-item retry with max_retries, drain on stop           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │  • In-memory (DashMap) or SQLite/MySQL (sqlx)               │
//! │  • Results deduplicated by SHA-256 of the full text         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sentiment_engine::{SentimentEngine, SentimentEngineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SentimentEngineConfig {
//!         remote_service_url: Some("http://localhost:8000".into()),
//!         sql_url: Some("sqlite:sentiment.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = SentimentEngine::new(config).await.expect("Failed to build engine");
//!     engine.start().expect("Failed to start");
//!
//!     let analysis = engine.analyze_text("I can't cope with these deadlines").await;
//!     println!("{:?} (alert: {:?})", analysis.result.label(), analysis.alert.map(|a| a.severity));
//!
//!     engine.stop().await.expect("Failed to stop");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SentimentEngine`] tying all components together
//! - [`client`]: [`FailsafeClient`] with circuit breaker and fallback
//! - [`classifier`]: Lexicon and remote classifiers
//! - [`alerting`]: Keyword/severity alert detection
//! - [`ingest`]: Bounded queue and batch worker
//! - [`storage`]: Storage backends (SQL, Memory)
//! - [`batching`]: Count/time batcher
//! - [`resilience`]: Circuit breaker, retry logic
//! - [`backpressure`]: Queue fill levels

pub mod config;
pub mod sentiment;
pub mod classifier;
pub mod client;
pub mod alerting;
pub mod storage;
pub mod batching;
pub mod ingest;
pub mod resilience;
pub mod backpressure;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{ConfigError, SentimentEngineConfig};
pub use coordinator::{Analysis, AnalysisBatch, EngineError, EngineState, EngineStatus, Persistence, SentimentEngine};
pub use sentiment::{Classification, Label, Probabilities, ResultSource, SentimentResult};
pub use classifier::{ClassifierError, LocalClassifier};
pub use classifier::lexicon::{LexiconClassifier, LexiconConfig};
pub use classifier::remote::{HttpInferenceAdapter, InferenceError, RemoteClassifier};
pub use client::{BatchPrediction, BatchSummary, ClientConfig, FailsafeClient};
pub use alerting::{Alert, AlertEngine, AlertStatus, AlertType, ContentMetadata, ContentType, KeywordRule, Severity};
pub use ingest::queue::{EnqueueError, IngestQueue, MetricRecord, QueueItem, QueueKind, QueuePayload, QueueReceiver, QueueStats};
pub use ingest::worker::{BatchWorker, WorkerConfig, WorkerStats, WorkerStatsSnapshot};
pub use storage::traits::{SentimentStore, StorageError, StoredAlert, StoredSentiment, StoreCounts};
pub use storage::memory::InMemoryStore;
pub use storage::sql::SqlStore;
pub use batching::hybrid_batcher::{Batch, BatchConfig, FlushBatch, FlushReason, HybridBatcher};
pub use backpressure::BackpressureLevel;
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
