// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ingest queue fill levels.
//!
//! The queue itself never blocks producers: once it is full, enqueue fails
//! fast and the item is dropped. These levels exist so the status read and
//! the logs can tell an operator how close the pipeline is to shedding
//! persistence work.
//!
//! # Example
//!
//! ```
//! use sentiment_engine::BackpressureLevel;
//!
//! let level = BackpressureLevel::from_queue(500, 10_000);
//! assert_eq!(level, BackpressureLevel::Normal);
//!
//! let level = BackpressureLevel::from_queue(9_500, 10_000);
//! assert_eq!(level, BackpressureLevel::Critical);
//! assert!(level.is_degraded());
//!
//! assert_eq!(BackpressureLevel::from_queue(10_000, 10_000), BackpressureLevel::Saturated);
//! ```

use serde::Serialize;

/// Queue pressure level.
///
/// - **Normal** (< 70%): persistence keeping up
/// - **Warn** (70-90%): worker falling behind, log a warning
/// - **Critical** (90-100%): drops imminent
/// - **Saturated** (100%): new items are being dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureLevel {
    Normal = 0,
    Warn = 1,
    Critical = 2,
    Saturated = 3,
}

impl BackpressureLevel {
    /// Calculate level from a fill ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.70 => Self::Normal,
            p if p < 0.90 => Self::Warn,
            p if p < 1.0 => Self::Critical,
            _ => Self::Saturated,
        }
    }

    /// Level for `depth` items buffered out of `capacity`
    #[must_use]
    pub fn from_queue(depth: usize, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::Saturated;
        }
        Self::from_pressure(depth as f64 / capacity as f64)
    }

    /// Whether a health check should report the pipeline as degraded
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        *self >= Self::Critical
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - ingest queue filling up",
            Self::Critical => "Critical - ingest queue nearly full",
            Self::Saturated => "Saturated - persistence work is being dropped",
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_level_thresholds() {
        assert_eq!(BackpressureLevel::from_pressure(0.0), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.69), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.70), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.89), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.90), BackpressureLevel::Critical);
        assert_eq!(BackpressureLevel::from_pressure(0.999), BackpressureLevel::Critical);
        assert_eq!(BackpressureLevel::from_pressure(1.0), BackpressureLevel::Saturated);
    }

    #[test]
    fn test_from_queue() {
        assert_eq!(BackpressureLevel::from_queue(0, 10), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_queue(8, 10), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_queue(10, 10), BackpressureLevel::Saturated);
        assert_eq!(BackpressureLevel::from_queue(0, 0), BackpressureLevel::Saturated);
    }

    #[test]
    fn test_degraded() {
        assert!(!BackpressureLevel::Normal.is_degraded());
        assert!(!BackpressureLevel::Warn.is_degraded());
        assert!(BackpressureLevel::Critical.is_degraded());
        assert!(BackpressureLevel::Saturated.is_degraded());
    }

    #[test]
    fn test_level_ordering() {
        assert!(BackpressureLevel::Normal < BackpressureLevel::Warn);
        assert!(BackpressureLevel::Warn < BackpressureLevel::Critical);
        assert!(BackpressureLevel::Critical < BackpressureLevel::Saturated);
    }

    #[test]
    fn test_display() {
        assert_eq!(BackpressureLevel::Warn.to_string(), "Warn");
        assert!(BackpressureLevel::Saturated.description().contains("dropped"));
    }
}
