// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sentiment result data structure.
//!
//! A [`SentimentResult`] is produced once per classification call and never
//! changes afterwards. It carries a bounded preview of the input text plus a
//! SHA-256 hash of the *full* text, which downstream storage uses as the
//! deduplication key.
//!
//! # Example
//!
//! ```
//! use sentiment_engine::{Classification, Label, Probabilities, ResultSource, SentimentResult};
//! use std::time::Duration;
//!
//! let result = SentimentResult::from_classification(
//!     "what a lovely day",
//!     100,
//!     Classification {
//!         label: Label::Positive,
//!         confidence: 0.9,
//!         compound_score: 0.8,
//!         probabilities: Probabilities::new(0.9, 0.03, 0.07),
//!     },
//!     "lexicon-v1",
//!     ResultSource::Fallback,
//!     Duration::from_micros(250),
//! );
//!
//! assert_eq!(result.label(), Label::Positive);
//! assert_eq!(result.text_hash().len(), 64);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resilience::circuit_breaker::CircuitState;

/// Model name reported by the emergency neutral default.
pub const EMERGENCY_MODEL: &str = "emergency-neutral";

/// Share of the non-winning mass given to neutral when a polar label wins.
const NEUTRAL_SKEW: f64 = 0.7;

/// Slack allowed when checking that probabilities sum to 1
const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Sentiment polarity label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Positive,
    Negative,
    Neutral,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Positive, Label::Negative, Label::Neutral];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" => Ok(Self::Positive),
            "negative" | "neg" => Ok(Self::Negative),
            "neutral" | "neu" => Ok(Self::Neutral),
            other => Err(format!("unknown sentiment label '{}'", other)),
        }
    }
}

/// Which classification path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Remote inference backend
    Primary,
    /// Local lexicon classifier
    Fallback,
    /// Neutral default used when every classifier failed
    Emergency,
}

impl ResultSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "fallback" => Ok(Self::Fallback),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown result source '{}'", other)),
        }
    }
}

/// Per-label probability mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl Probabilities {
    #[must_use]
    pub fn new(positive: f64, negative: f64, neutral: f64) -> Self {
        Self { positive, negative, neutral }
    }

    /// Uniform distribution (1/3 each)
    #[must_use]
    pub fn uniform() -> Self {
        Self::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)
    }

    #[must_use]
    pub fn get(&self, label: Label) -> f64 {
        match label {
            Label::Positive => self.positive,
            Label::Negative => self.negative,
            Label::Neutral => self.neutral,
        }
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.positive + self.negative + self.neutral
    }

    /// Back-compute a distribution where `label` holds `confidence`.
    ///
    /// For a polar winner the remainder is split 70/30 in favour of neutral;
    /// for a neutral winner it is split evenly between the two polarities.
    #[must_use]
    pub fn from_confidence(label: Label, confidence: f64) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let rest = 1.0 - confidence;
        match label {
            Label::Positive => Self::new(confidence, rest * (1.0 - NEUTRAL_SKEW), rest * NEUTRAL_SKEW),
            Label::Negative => Self::new(rest * (1.0 - NEUTRAL_SKEW), confidence, rest * NEUTRAL_SKEW),
            Label::Neutral => Self::new(rest / 2.0, rest / 2.0, confidence),
        }
    }

    /// Rescale to sum to 1.
    ///
    /// Returns `None` when any entry is negative or non-finite, or when all
    /// entries are zero. A distribution already within rounding of 1 is
    /// returned unchanged.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let values = [self.positive, self.negative, self.neutral];
        if values.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return None;
        }
        let sum = self.sum();
        if sum <= 0.0 {
            return None;
        }
        if (sum - 1.0).abs() <= PROBABILITY_TOLERANCE {
            return Some(*self);
        }
        Some(Self::new(self.positive / sum, self.negative / sum, self.neutral / sum))
    }

    /// Label with the largest probability (ties resolve toward neutral).
    #[must_use]
    pub fn argmax(&self) -> Label {
        let mut best = Label::Neutral;
        for label in [Label::Positive, Label::Negative] {
            if self.get(label) > self.get(best) {
                best = label;
            }
        }
        best
    }
}

/// Raw classifier output before it is stamped with identity and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
    pub compound_score: f64,
    pub probabilities: Probabilities,
}

/// Immutable classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentResult {
    text: String,
    text_hash: String,
    label: Label,
    confidence: f64,
    compound_score: f64,
    probabilities: Probabilities,
    processing_time_ms: f64,
    model_used: String,
    source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    circuit_state: Option<CircuitState>,
    /// Creation timestamp (epoch millis)
    created_at: i64,
}

impl SentimentResult {
    /// Build a result from a classifier's output.
    ///
    /// Scores are clamped into their documented ranges. Probabilities are
    /// renormalized, or rebuilt from the label and confidence when unusable.
    pub fn from_classification(
        text: &str,
        preview_chars: usize,
        classification: Classification,
        model_used: impl Into<String>,
        source: ResultSource,
        processing_time: Duration,
    ) -> Self {
        let confidence = clamp_finite(classification.confidence, 0.0, 1.0);
        Self {
            text: preview(text, preview_chars),
            text_hash: text_hash(text),
            label: classification.label,
            confidence,
            compound_score: clamp_finite(classification.compound_score, -1.0, 1.0),
            probabilities: classification
                .probabilities
                .normalized()
                .unwrap_or_else(|| Probabilities::from_confidence(classification.label, confidence)),
            processing_time_ms: processing_time.as_secs_f64() * 1000.0,
            model_used: model_used.into(),
            source,
            circuit_state: None,
            created_at: now_millis(),
        }
    }

    /// Neutral default returned when no classifier could produce a result.
    pub fn emergency(text: &str, preview_chars: usize, processing_time: Duration) -> Self {
        Self::from_classification(
            text,
            preview_chars,
            Classification {
                label: Label::Neutral,
                confidence: 0.5,
                compound_score: 0.0,
                probabilities: Probabilities::new(0.25, 0.25, 0.5),
            },
            EMERGENCY_MODEL,
            ResultSource::Emergency,
            processing_time,
        )
    }

    /// Stamp the breaker state observed for this call.
    #[must_use]
    pub fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.circuit_state = Some(state);
        self
    }

    /// Bounded preview of the input text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex SHA-256 of the full input text
    pub fn text_hash(&self) -> &str {
        &self.text_hash
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn compound_score(&self) -> f64 {
        self.compound_score
    }

    pub fn probabilities(&self) -> Probabilities {
        self.probabilities
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }

    pub fn model_used(&self) -> &str {
        &self.model_used
    }

    pub fn source(&self) -> ResultSource {
        self.source
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_state
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

/// Hex-encoded SHA-256 of `text`.
#[must_use]
pub fn text_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// First `max_chars` characters of `text` (char boundary safe).
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0_f64.clamp(min, max);
    }
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(label: Label) -> Classification {
        Classification {
            label,
            confidence: 0.8,
            compound_score: 0.5,
            probabilities: Probabilities::new(0.8, 0.05, 0.15),
        }
    }

    #[test]
    fn test_hash_covers_full_text_not_preview() {
        let long_a = format!("{}{}", "x".repeat(150), "a");
        let long_b = format!("{}{}", "x".repeat(150), "b");

        let a = SentimentResult::from_classification(&long_a, 100, classification(Label::Positive), "m", ResultSource::Fallback, Duration::ZERO);
        let b = SentimentResult::from_classification(&long_b, 100, classification(Label::Positive), "m", ResultSource::Fallback, Duration::ZERO);

        assert_eq!(a.text(), b.text());
        assert_eq!(a.text().chars().count(), 100);
        assert_ne!(a.text_hash(), b.text_hash());
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(text_hash("hello"), text_hash("hello"));
        assert_eq!(
            text_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "héllo wörld ✨✨✨";
        assert_eq!(preview(text, 3), "hél");
        assert_eq!(preview(text, 100), text);
        assert_eq!(preview("", 10), "");
    }

    #[test]
    fn test_scores_are_clamped() {
        let raw = Classification {
            label: Label::Negative,
            confidence: 1.7,
            compound_score: -3.0,
            probabilities: Probabilities::uniform(),
        };
        let result = SentimentResult::from_classification("x", 100, raw, "m", ResultSource::Primary, Duration::ZERO);
        assert_eq!(result.confidence(), 1.0);
        assert_eq!(result.compound_score(), -1.0);
    }

    #[test]
    fn test_probabilities_normalized() {
        let probs = Probabilities::new(2.0, 1.0, 1.0).normalized().unwrap();
        assert!((probs.positive - 0.5).abs() < 1e-9);
        assert!((probs.sum() - 1.0).abs() < 1e-9);

        let exact = Probabilities::new(0.04, 0.87, 0.09);
        assert_eq!(exact.normalized(), Some(exact));

        assert!(Probabilities::new(-0.1, 0.6, 0.5).normalized().is_none());
        assert!(Probabilities::new(f64::NAN, 0.5, 0.5).normalized().is_none());
        assert!(Probabilities::new(0.0, 0.0, 0.0).normalized().is_none());
    }

    #[test]
    fn test_unusable_probabilities_rebuilt_from_confidence() {
        let raw = Classification {
            label: Label::Negative,
            confidence: 0.8,
            compound_score: -0.6,
            probabilities: Probabilities::new(f64::NAN, -1.0, 0.2),
        };
        let result = SentimentResult::from_classification("x", 100, raw, "m", ResultSource::Primary, Duration::ZERO);
        let probs = result.probabilities();
        assert!((probs.sum() - 1.0).abs() < 1e-9);
        assert!((probs.negative - 0.8).abs() < 1e-9);
        assert_eq!(probs.argmax(), Label::Negative);
    }

    #[test]
    fn test_emergency_result_is_neutral() {
        let result = SentimentResult::emergency("anything", 100, Duration::ZERO);
        assert_eq!(result.label(), Label::Neutral);
        assert_eq!(result.source(), ResultSource::Emergency);
        assert_eq!(result.model_used(), EMERGENCY_MODEL);
        assert!((result.probabilities().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_parse_roundtrip() {
        for label in Label::ALL {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
        assert_eq!("NEG".parse::<Label>().unwrap(), Label::Negative);
        assert!("angry".parse::<Label>().is_err());
    }

    #[test]
    fn test_from_confidence_skews_toward_neutral() {
        let probs = Probabilities::from_confidence(Label::Negative, 0.8);
        assert!((probs.negative - 0.8).abs() < 1e-9);
        assert!(probs.neutral > probs.positive);
        assert!((probs.sum() - 1.0).abs() < 1e-9);

        let probs = Probabilities::from_confidence(Label::Neutral, 0.6);
        assert!((probs.positive - probs.negative).abs() < 1e-9);
        assert!((probs.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_argmax_prefers_neutral_on_tie() {
        assert_eq!(Probabilities::uniform().argmax(), Label::Neutral);
        assert_eq!(Probabilities::new(0.1, 0.7, 0.2).argmax(), Label::Negative);
    }

    #[test]
    fn test_serializes_lowercase_labels() {
        let result = SentimentResult::from_classification("ok", 100, classification(Label::Positive), "m", ResultSource::Fallback, Duration::ZERO)
            .with_circuit_state(CircuitState::HalfOpen);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["label"], "positive");
        assert_eq!(json["source"], "fallback");
        assert_eq!(json["circuit_state"], "half_open");
    }
}
