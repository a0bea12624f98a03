// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sentiment engine coordinator.

use serde::Serialize;
use thiserror::Error;

use crate::alerting::Alert;
use crate::backpressure::BackpressureLevel;
use crate::client::BatchSummary;
use crate::config::ConfigError;
use crate::ingest::queue::{QueueKind, QueueStats};
use crate::ingest::worker::WorkerStatsSnapshot;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::sentiment::SentimentResult;
use crate::storage::traits::StorageError;
use crate::classifier::remote::InferenceError;

/// Engine lifecycle state.
///
/// Use [`super::SentimentEngine::state()`] to check current state or
/// [`super::SentimentEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Built, batch worker not yet spawned
    Created,
    /// Batch worker consuming the queue
    Running,
    /// Stop requested, worker flushing what it holds
    Draining,
    /// Worker finished; `start()` may be called again
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("inference adapter setup failed: {0}")]
    Inference(#[from] InferenceError),

    /// The worker task ended abnormally; its queue receiver is lost.
    #[error("batch worker failed: {0}")]
    Worker(String),
}

/// Whether an analysis was handed to the persistence pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Persistence {
    /// Every record was accepted by the queue
    Enqueued,
    /// The queue rejected these records; they will not be stored
    Dropped { kinds: Vec<QueueKind> },
}

impl Persistence {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued)
    }
}

/// Outcome of [`super::SentimentEngine::analyze`].
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub result: SentimentResult,
    pub alert: Option<Alert>,
    pub persistence: Persistence,
}

/// Outcome of [`super::SentimentEngine::analyze_batch`], in input order.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisBatch {
    pub analyses: Vec<Analysis>,
    pub summary: BatchSummary,
    pub alerts_raised: usize,
    pub dropped: usize,
}

/// Status read for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub remote_configured: bool,
    pub circuit: CircuitSnapshot,
    pub queue: QueueStats,
    pub backpressure: BackpressureLevel,
    pub worker: WorkerStatsSnapshot,
    pub store_backend: &'static str,
}

impl EngineStatus {
    /// Running, and neither the breaker nor the queue is degraded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == EngineState::Running
            && self.circuit.state == crate::resilience::circuit_breaker::CircuitState::Closed
            && !self.backpressure.is_degraded()
    }
}
