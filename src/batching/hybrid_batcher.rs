// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Count/time batching for the ingest worker.
//!
//! The [`HybridBatcher`] collects items and hands them out once either
//! `flush_count` items are buffered or `flush_ms` has elapsed since the last
//! flush, whichever comes first. The batcher is owned by a single consumer
//! and never shared with producers.
//!
//! # Example
//!
//! ```
//! use sentiment_engine::{BatchConfig, FlushReason, HybridBatcher};
//!
//! let mut batcher: HybridBatcher<u32> = HybridBatcher::new(BatchConfig {
//!     flush_ms: 1000,
//!     flush_count: 2,
//! });
//!
//! assert!(batcher.push(1).is_none());
//! assert_eq!(batcher.push(2), Some(FlushReason::Count));
//!
//! let batch = batcher.take_if_ready().unwrap();
//! assert_eq!(batch.items, vec![1, 2]);
//! ```

use std::time::{Duration, Instant};
use tracing::debug;

/// Batch flush trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Time threshold reached
    Time,
    /// Item count threshold reached
    Count,
    /// Manual flush requested
    Manual,
    /// Shutdown drain
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Count => "count",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Configuration for batching
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush after this many milliseconds since the last flush
    pub flush_ms: u64,
    /// Flush after this many items
    pub flush_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_ms: 1000,
            flush_count: 100,
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }
}

/// A batch of items ready for flush
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub reason: FlushReason,
}

/// A batch of items pending flush
#[derive(Debug)]
pub struct Batch<T> {
    pub items: Vec<T>,
    /// Start of the current window (reset on every take)
    pub started_at: Instant,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn take(&mut self) -> Vec<T> {
        self.started_at = Instant::now();
        std::mem::take(&mut self.items)
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Batcher that flushes on count or time, whichever is hit first.
pub struct HybridBatcher<T> {
    config: BatchConfig,
    batch: Batch<T>,
}

impl<T> HybridBatcher<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            batch: Batch::new(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Add an item, returns the flush reason if the count threshold is hit
    pub fn push(&mut self, item: T) -> Option<FlushReason> {
        self.batch.items.push(item);
        if self.batch.len() >= self.config.flush_count {
            Some(FlushReason::Count)
        } else {
            None
        }
    }

    /// Check if time threshold exceeded
    #[must_use]
    pub fn should_flush_time(&self) -> bool {
        !self.batch.is_empty() && self.batch.age() >= self.config.flush_interval()
    }

    /// Time left in the current window (zero once it has elapsed)
    #[must_use]
    pub fn time_until_flush(&self) -> Duration {
        self.config.flush_interval().saturating_sub(self.batch.age())
    }

    /// Take the batch if any threshold is ready
    pub fn take_if_ready(&mut self) -> Option<FlushBatch<T>> {
        let reason = if self.batch.len() >= self.config.flush_count {
            FlushReason::Count
        } else if self.should_flush_time() {
            FlushReason::Time
        } else {
            return None;
        };
        self.force_flush_with_reason(reason)
    }

    /// Force flush regardless of thresholds
    pub fn force_flush(&mut self) -> Option<FlushBatch<T>> {
        self.force_flush_with_reason(FlushReason::Manual)
    }

    /// Force flush with a specific reason
    pub fn force_flush_with_reason(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.batch.is_empty() {
            return None;
        }
        let items = self.batch.take();
        debug!(count = items.len(), reason = reason.as_str(), "Batch taken for flush");
        Some(FlushBatch { items, reason })
    }

    /// Restart the time window without flushing (used after an idle tick)
    pub fn reset_window(&mut self) {
        if self.batch.is_empty() {
            self.batch.started_at = Instant::now();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Current batch stats (count, age)
    #[must_use]
    pub fn stats(&self) -> (usize, Duration) {
        (self.batch.len(), self.batch.age())
    }
}
