// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for sentiment-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `sentiment_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `source`: primary, fallback, emergency
//! - `kind`: sentiment_result, alert, metric
//! - `outcome`: success, failure, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed prediction and which path served it
pub fn record_prediction(source: &str, label: &str, duration: Duration) {
    counter!(
        "sentiment_engine_predictions_total",
        "source" => source.to_string(),
        "label" => label.to_string()
    )
    .increment(1);
    histogram!(
        "sentiment_engine_prediction_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed remote inference attempt
pub fn record_remote_failure(error_kind: &str) {
    counter!(
        "sentiment_engine_remote_failures_total",
        "error_kind" => error_kind.to_string()
    )
    .increment(1);
}

/// Record batch prediction size
pub fn record_batch_prediction(count: usize) {
    histogram!("sentiment_engine_batch_prediction_size").record(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "sentiment_engine_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "sentiment_engine_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ALERTING
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_alert(alert_type: &str, severity: &str) {
    counter!(
        "sentiment_engine_alerts_total",
        "alert_type" => alert_type.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// INGEST QUEUE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_enqueue(kind: &str) {
    counter!(
        "sentiment_engine_enqueued_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an item rejected at enqueue (data loss)
pub fn record_enqueue_drop(kind: &str, reason: &str) {
    counter!(
        "sentiment_engine_enqueue_dropped_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("sentiment_engine_queue_depth").set(depth as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCH FLUSH
// ═══════════════════════════════════════════════════════════════════════════

/// Record a batch flush: trigger, size and duration
pub fn record_flush(reason: &str, items: usize, duration: Duration) {
    counter!(
        "sentiment_engine_flushes_total",
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!("sentiment_engine_flush_size").record(items as f64);
    histogram!("sentiment_engine_flush_seconds").record(duration.as_secs_f64());
}

pub fn record_persisted(kind: &str, count: usize) {
    counter!(
        "sentiment_engine_persisted_total",
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

pub fn record_retry(kind: &str) {
    counter!(
        "sentiment_engine_persist_retries_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an item dropped after exhausting persistence retries
pub fn record_terminal_drop(kind: &str) {
    counter!(
        "sentiment_engine_persist_dropped_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Set engine state (counts state machine transitions)
pub fn set_engine_state(state: &str) {
    counter!(
        "sentiment_engine_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records an operation's latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(
            "sentiment_engine_operation_seconds",
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
