// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sentiment engine coordinator.
//!
//! The [`SentimentEngine`] ties the components together:
//! - [`FailsafeClient`]: remote inference behind a circuit breaker, lexicon fallback
//! - [`AlertEngine`]: keyword/severity alert detection
//! - [`IngestQueue`] + [`BatchWorker`]: asynchronous batched persistence
//! - [`SentimentStore`]: in-memory or SQL backend
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Draining ──► Stopped
//!                         ▲                                │
//!                         └──────────── start() ───────────┘
//! ```
//!
//! Construction never spawns tasks. Items enqueued while the worker is not
//! running wait in the queue (up to its capacity) until `start()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use sentiment_engine::{ContentMetadata, ContentType, EngineState, SentimentEngine, SentimentEngineConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), sentiment_engine::EngineError> {
//! let engine = SentimentEngine::new(SentimentEngineConfig::default()).await?;
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start()?;
//! let analysis = engine
//!     .analyze(ContentMetadata::new("t3_abc", "finals week has me so stressed", ContentType::Post))
//!     .await;
//! println!("{} via {}", analysis.result.label(), analysis.result.source());
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{Analysis, AnalysisBatch, EngineError, EngineState, EngineStatus, Persistence};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerting::AlertEngine;
use crate::backpressure::BackpressureLevel;
use crate::classifier::lexicon::LexiconClassifier;
use crate::classifier::remote::{HttpInferenceAdapter, RemoteClassifier};
use crate::client::FailsafeClient;
use crate::config::SentimentEngineConfig;
use crate::ingest::queue::{IngestQueue, QueueReceiver};
use crate::ingest::worker::{BatchWorker, WorkerStats};
use crate::storage::memory::InMemoryStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::SentimentStore;

/// Handle to the spawned batch worker.
struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<QueueReceiver>,
}

/// Main sentiment engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. Prediction paths
/// take `&self` and never block on persistence.
pub struct SentimentEngine {
    pub(super) config: SentimentEngineConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) client: FailsafeClient,
    pub(super) alerts: AlertEngine,
    pub(super) store: Arc<dyn SentimentStore>,

    /// Producer side of the ingest queue
    pub(super) queue: IngestQueue,

    /// Consumer side, parked here while no worker owns it
    pub(super) receiver: Mutex<Option<QueueReceiver>>,

    pub(super) worker: Mutex<Option<WorkerHandle>>,
    pub(super) worker_stats: Arc<WorkerStats>,
}

impl SentimentEngine {
    /// Build an engine from configuration.
    ///
    /// Connects to `sql_url` when set (with startup retry), otherwise keeps
    /// results in memory. The engine starts in `Created` state; call
    /// [`start()`](Self::start) to spawn the batch worker.
    #[tracing::instrument(skip(config), fields(has_remote, has_sql))]
    pub async fn new(config: SentimentEngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let lexicon = Arc::new(LexiconClassifier::new(config.lexicon_config()));

        let remote: Option<Arc<dyn RemoteClassifier>> = match &config.remote_service_url {
            Some(url) => {
                let adapter = HttpInferenceAdapter::new(url, config.preview_chars)?;
                info!(endpoint = adapter.endpoint(), "Remote inference configured");
                Some(Arc::new(adapter))
            }
            None => {
                info!("No remote inference URL configured, serving lexicon only");
                None
            }
        };
        tracing::Span::current().record("has_remote", remote.is_some());

        let store: Arc<dyn SentimentStore> = match &config.sql_url {
            Some(url) => {
                let store = SqlStore::connect(url).await?;
                info!(backend = store.backend(), "SQL store connected");
                Arc::new(store)
            }
            None => Arc::new(InMemoryStore::new()),
        };
        tracing::Span::current().record("has_sql", config.sql_url.is_some());

        let client = FailsafeClient::new(remote, lexicon, config.client_config());
        Ok(Self::with_components(config, client, store, AlertEngine::default()))
    }

    /// Assemble an engine from prebuilt parts (custom classifiers, stores or
    /// keyword tables).
    pub fn with_components(
        config: SentimentEngineConfig,
        client: FailsafeClient,
        store: Arc<dyn SentimentStore>,
        alerts: AlertEngine,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (queue, receiver) = IngestQueue::bounded(config.queue_capacity);

        Self {
            config,
            state: state_tx,
            state_rx,
            client,
            alerts,
            store,
            queue,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            worker_stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &SentimentEngineConfig {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &FailsafeClient {
        &self.client
    }

    #[must_use]
    pub fn alert_engine(&self) -> &AlertEngine {
        &self.alerts
    }

    /// Persistence backend, for read-back.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SentimentStore> {
        &self.store
    }

    /// Get current backpressure level of the ingest queue.
    #[must_use]
    pub fn pressure(&self) -> BackpressureLevel {
        self.queue.backpressure()
    }

    /// Collect breaker, queue and worker state. No I/O.
    pub fn status(&self) -> EngineStatus {
        let queue = self.queue.stats();
        EngineStatus {
            state: self.state(),
            remote_configured: self.client.has_remote(),
            circuit: self.client.circuit_snapshot(),
            backpressure: BackpressureLevel::from_queue(queue.depth, queue.capacity),
            queue,
            worker: self.worker_stats.snapshot(),
            store_backend: self.store.backend(),
        }
    }

    fn spawn_worker(&self, receiver: QueueReceiver) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = BatchWorker::new(
            self.store.clone(),
            self.queue.clone(),
            receiver,
            self.config.worker_config(),
            self.worker_stats.clone(),
            shutdown_rx,
        );
        WorkerHandle {
            shutdown: shutdown_tx,
            join: tokio::spawn(worker.run()),
        }
    }
}
