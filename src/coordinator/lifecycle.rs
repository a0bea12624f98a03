// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: start and stop of the batch worker.

use tracing::{error, info, warn};

use crate::ingest::worker::WorkerStatsSnapshot;

use super::{EngineError, EngineState, SentimentEngine};

impl SentimentEngine {
    /// Spawn the batch worker.
    ///
    /// Must be called from within a Tokio runtime. Items enqueued before
    /// this call are picked up by the first flush.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), EngineError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let Some(receiver) = self.receiver.lock().take() else {
            // A previous worker died and took the receiver with it
            return Err(EngineError::Worker("queue receiver unavailable".into()));
        };

        *worker = Some(self.spawn_worker(receiver));
        drop(worker);

        self.set_state(EngineState::Running);
        info!(
            queue_capacity = self.queue.capacity(),
            queued = self.queue.depth(),
            "Sentiment engine started"
        );
        Ok(())
    }

    /// Signal the worker, wait for its drain flush, and park the queue
    /// receiver so the engine can be started again.
    ///
    /// Returns cumulative worker counters after the drain.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<WorkerStatsSnapshot, EngineError> {
        let Some(handle) = self.worker.lock().take() else {
            return Err(EngineError::NotRunning);
        };

        let stop_start = std::time::Instant::now();
        info!(queued = self.queue.depth(), "Stopping sentiment engine, draining queue...");
        self.set_state(EngineState::Draining);

        if handle.shutdown.send(true).is_err() {
            warn!("Batch worker already exited before shutdown signal");
        }

        let outcome = match handle.join.await {
            Ok(receiver) => {
                *self.receiver.lock() = Some(receiver);
                let stats = self.worker_stats.snapshot();
                info!(
                    processed = stats.processed,
                    failed = stats.failed,
                    retried = stats.retried,
                    elapsed_ms = stop_start.elapsed().as_millis() as u64,
                    "Sentiment engine stopped"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(error = %e, "Batch worker terminated abnormally; queued items are lost");
                Err(EngineError::Worker(e.to_string()))
            }
        };

        self.set_state(EngineState::Stopped);
        outcome
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SentimentEngineConfig;

    async fn engine() -> SentimentEngine {
        SentimentEngine::new(SentimentEngineConfig {
            batch_timeout_ms: 20,
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let engine = engine().await;
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let engine = engine().await;
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
        assert_eq!(engine.state(), EngineState::Created);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let engine = engine().await;
        let mut states = engine.state_receiver();

        engine.start().unwrap();
        assert_eq!(*states.borrow_and_update(), EngineState::Running);

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.start().unwrap();
        assert!(engine.is_running());

        let analysis = engine.analyze_text("back again and feeling great").await;
        assert!(analysis.persistence.is_enqueued());

        let stats = engine.stop().await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_items_enqueued_before_start_are_persisted() {
        let engine = engine().await;
        engine.analyze_text("queued while idle").await;
        assert_eq!(engine.status().queue.depth, 1);

        engine.start().unwrap();
        let stats = engine.stop().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(engine.store().counts().await.unwrap().sentiments, 1);
    }
}
