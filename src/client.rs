// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failsafe inference client.
//!
//! [`FailsafeClient::predict`] never fails. Per call it decides, through the
//! circuit breaker, whether to try the remote backend; any rejection, error
//! or timeout is absorbed and the text is classified locally instead. If the
//! local classifier also fails, a neutral emergency result is returned.
//!
//! ```text
//! predict(text)
//!   ├─ breaker admits ──► remote (bounded by timeout) ──ok──► primary result
//!   │                                                 └─err─► fallback
//!   └─ breaker rejects ─────────────────────────────────────► fallback
//! fallback: local classifier ──ok──► fallback result
//!                            └─err─► emergency neutral result
//! ```
//!
//! Every result is stamped with the breaker state observed for its call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::classifier::remote::{InferenceError, RemoteClassifier};
use crate::classifier::LocalClassifier;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState};
use crate::sentiment::{Label, ResultSource, SentimentResult};

/// Breaker name used in logs and metrics.
pub const INFERENCE_CIRCUIT: &str = "inference";

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub circuit: CircuitConfig,
    /// Bound on a single remote call, independent of the breaker's cooldown
    pub remote_timeout: Duration,
    /// Preview length for emergency results
    pub preview_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            circuit: CircuitConfig::default(),
            remote_timeout: Duration::from_secs(5),
            preview_chars: 100,
        }
    }
}

/// Remote-first classifier with local fallback.
pub struct FailsafeClient {
    breaker: CircuitBreaker,
    remote: Option<Arc<dyn RemoteClassifier>>,
    local: Arc<dyn LocalClassifier>,
    remote_timeout: Duration,
    preview_chars: usize,
}

impl FailsafeClient {
    pub fn new(
        remote: Option<Arc<dyn RemoteClassifier>>,
        local: Arc<dyn LocalClassifier>,
        config: ClientConfig,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(INFERENCE_CIRCUIT, config.circuit),
            remote,
            local,
            remote_timeout: config.remote_timeout,
            preview_chars: config.preview_chars,
        }
    }

    /// Client without a remote backend: every call is served locally.
    pub fn fallback_only(local: Arc<dyn LocalClassifier>, config: ClientConfig) -> Self {
        Self::new(None, local, config)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Classify one text. Always returns a well-formed result.
    pub async fn predict(&self, text: &str) -> SentimentResult {
        let start = Instant::now();

        let (result, observed) = match &self.remote {
            Some(remote) => match self.try_remote(remote.as_ref(), text).await {
                (Ok(result), observed) => (result, observed),
                (Err(e), observed) => {
                    match &e {
                        CircuitError::Rejected => {
                            debug!(circuit_state = %observed, "Remote skipped, serving fallback");
                        }
                        CircuitError::Inner(err) => {
                            crate::metrics::record_remote_failure(err.kind());
                            warn!(error = %err, circuit_state = %observed, "Remote inference failed, serving fallback");
                        }
                    }
                    (self.fallback(text, start), observed)
                }
            },
            None => (self.fallback(text, start), self.breaker.state()),
        };

        let result = result.with_circuit_state(observed);
        crate::metrics::record_prediction(result.source().as_str(), result.label().as_str(), start.elapsed());
        result
    }

    /// One guarded remote attempt, plus the breaker state it was made under.
    async fn try_remote(
        &self,
        remote: &dyn RemoteClassifier,
        text: &str,
    ) -> (Result<SentimentResult, CircuitError<InferenceError>>, CircuitState) {
        let ticket = match self.breaker.try_admit() {
            Ok(ticket) => ticket,
            Err(blocked_by) => return (Err(CircuitError::Rejected), blocked_by),
        };
        let admitted_under = ticket.admitted_under();
        let timeout = self.remote_timeout;

        let outcome = match tokio::time::timeout(timeout, remote.try_classify(text, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(timeout)),
        };

        match outcome {
            Ok(result) => {
                ticket.succeed();
                (Ok(result), admitted_under)
            }
            Err(e) => {
                ticket.fail();
                (Err(CircuitError::Inner(e)), admitted_under)
            }
        }
    }

    fn fallback(&self, text: &str, start: Instant) -> SentimentResult {
        match self.local.classify_local(text) {
            Ok(result) => result,
            Err(e) => {
                error!(classifier = self.local.name(), error = %e, "Local classifier failed, returning neutral default");
                SentimentResult::emergency(text, self.preview_chars, start.elapsed())
            }
        }
    }

    /// Classify each text with the same per-item policy and summarize.
    pub async fn predict_batch<S: AsRef<str>>(&self, texts: &[S]) -> BatchPrediction {
        let start = Instant::now();
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.predict(text.as_ref()).await);
        }
        crate::metrics::record_batch_prediction(results.len());
        let summary = BatchSummary::from_results(&results, start.elapsed());
        BatchPrediction { results, summary }
    }
}

/// Results of [`FailsafeClient::predict_batch`], in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub results: Vec<SentimentResult>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub primary: usize,
    pub fallback: usize,
    pub emergency: usize,
}

/// Aggregate over a batch of predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Results produced by a real classifier (primary or fallback)
    pub succeeded: usize,
    /// Results that fell through to the emergency default
    pub failed: usize,
    pub labels: LabelCounts,
    pub sources: SourceCounts,
    /// Wall-clock time for the whole batch
    pub total_ms: f64,
    pub average_ms: f64,
    /// Path that served most items; ties prefer primary, then fallback
    pub majority_source: Option<ResultSource>,
}

impl BatchSummary {
    pub fn from_results(results: &[SentimentResult], elapsed: Duration) -> Self {
        let mut labels = LabelCounts::default();
        let mut sources = SourceCounts::default();

        for result in results {
            match result.label() {
                Label::Positive => labels.positive += 1,
                Label::Negative => labels.negative += 1,
                Label::Neutral => labels.neutral += 1,
            }
            match result.source() {
                ResultSource::Primary => sources.primary += 1,
                ResultSource::Fallback => sources.fallback += 1,
                ResultSource::Emergency => sources.emergency += 1,
            }
        }

        let total = results.len();
        let total_ms = elapsed.as_secs_f64() * 1000.0;
        let majority_source = if total == 0 {
            None
        } else {
            [
                (ResultSource::Primary, sources.primary),
                (ResultSource::Fallback, sources.fallback),
                (ResultSource::Emergency, sources.emergency),
            ]
            .into_iter()
            .fold(None, |best: Option<(ResultSource, usize)>, (source, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((source, count)),
            })
            .map(|(source, _)| source)
        };

        Self {
            total,
            succeeded: total - sources.emergency,
            failed: sources.emergency,
            labels,
            sources,
            total_ms,
            average_ms: if total == 0 { 0.0 } else { total_ms / total as f64 },
            majority_source,
        }
    }
}
