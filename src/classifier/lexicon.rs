// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lexicon/rule-based sentiment classifier.
//!
//! Deterministic, synchronous and CPU-only. This is the fallback used when
//! the remote backend is unavailable, so it has no failure mode: empty or
//! unparseable input classifies as neutral.
//!
//! Scoring:
//! 1. Strip URLs, HTML tags and markdown link targets.
//! 2. Lower-case and split on whitespace, trimming punctuation.
//! 3. For every polar term, look back up to two tokens. Intensifiers scale
//!    the contribution; a negation moves it to the opposite polarity at
//!    reduced weight.
//! 4. `compound = (pos - neg) / max(pos + neg, 1)`.
//!
//! # Example
//!
//! ```
//! use sentiment_engine::{Label, LexiconClassifier};
//!
//! let lexicon = LexiconClassifier::default();
//! assert_eq!(lexicon.classify("this is not bad at all").label(), Label::Positive);
//! assert_eq!(lexicon.classify("").label(), Label::Neutral);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;

use crate::sentiment::{Classification, Label, Probabilities, ResultSource, SentimentResult};

use super::{ClassifierError, LocalClassifier};

/// Model name reported by lexicon results.
pub const LEXICON_MODEL: &str = "lexicon-v1";

/// Compound score at or above which text is positive.
pub const POSITIVE_THRESHOLD: f64 = 0.1;
/// Compound score at or below which text is negative.
pub const NEGATIVE_THRESHOLD: f64 = -0.1;

/// How many preceding tokens are inspected for negations and intensifiers.
const LOOKBACK: usize = 2;
/// Weight kept by a negated term when it flips polarity.
const NEGATION_SCALE: f64 = 0.75;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid url regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid markdown link regex"));

static POSITIVE_TERMS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "good", "great", "excellent", "amazing", "awesome", "happy", "happier", "love", "loved",
        "loving", "lovely", "wonderful", "fantastic", "best", "better", "nice", "glad", "excited",
        "exciting", "enjoy", "enjoyed", "enjoying", "beautiful", "brilliant", "proud", "grateful",
        "thankful", "thanks", "hopeful", "calm", "relaxed", "confident", "fun", "perfect",
        "success", "successful", "win", "won", "passed", "helpful", "supportive", "kind", "like",
        "liked", "cool", "peaceful", "optimistic", "motivated", "relieved", "thrilled",
        "delighted", "pleased", "improve", "improved", "improving", "safe", "strong", "joy",
        "blessed", "positive", "recommend", "impressive", "satisfied",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_TERMS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "bad", "terrible", "awful", "horrible", "hate", "hated", "hating", "sad", "sadness",
        "depressed", "depressing", "depression", "anxious", "anxiety", "stress", "stressed",
        "stressful", "worried", "worry", "worrying", "angry", "upset", "hopeless", "worthless",
        "lonely", "alone", "miserable", "tired", "exhausted", "overwhelmed", "afraid", "scared",
        "fear", "hurt", "hurting", "pain", "painful", "cry", "crying", "fail", "failed",
        "failing", "failure", "worst", "worse", "sick", "broken", "lost", "useless",
        "disappointed", "disappointing", "frustrated", "frustrating", "annoying", "annoyed",
        "struggle", "struggling", "suffer", "suffering", "die", "dying", "dead", "kill",
        "panic", "helpless", "empty", "numb", "bullied", "harassed", "threatened", "regret",
        "ashamed", "guilty", "problem", "difficult", "pathetic", "stupid", "disgusting", "cruel",
        "unfair", "negative", "poor", "burnout", "burned",
    ]
    .into_iter()
    .collect()
});

static NEGATIONS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "without",
        "cannot", "cant", "dont", "doesnt", "didnt", "isnt", "wasnt", "arent", "werent",
        "wont", "wouldnt", "shouldnt", "couldnt", "aint",
    ]
    .into_iter()
    .collect()
});

static INTENSIFIERS: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    [
        ("very", 1.5),
        ("really", 1.3),
        ("extremely", 1.8),
        ("so", 1.3),
        ("completely", 1.5),
        ("totally", 1.5),
        ("absolutely", 1.6),
        ("incredibly", 1.7),
        ("super", 1.4),
        ("too", 1.2),
        ("deeply", 1.5),
        ("truly", 1.3),
        ("utterly", 1.7),
        ("slightly", 0.6),
        ("somewhat", 0.7),
        ("barely", 0.5),
        ("kinda", 0.8),
        ("hardly", 0.5),
    ]
    .into_iter()
    .collect()
});

/// Tuning for the lexicon classifier.
#[derive(Debug, Clone)]
pub struct LexiconConfig {
    /// Upper bound on reported confidence
    pub confidence_ceiling: f64,
    /// Preview length stored on results
    pub preview_chars: usize,
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            confidence_ceiling: 0.95,
            preview_chars: 100,
        }
    }
}

/// Stateless lexicon scorer; safe to share across threads without locking.
#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier {
    config: LexiconConfig,
}

impl LexiconClassifier {
    pub fn new(config: LexiconConfig) -> Self {
        Self { config }
    }

    /// Classify `text` into a full result tagged as the fallback source.
    pub fn classify(&self, text: &str) -> SentimentResult {
        let start = Instant::now();
        let classification = self.score(text);
        SentimentResult::from_classification(
            text,
            self.config.preview_chars,
            classification,
            LEXICON_MODEL,
            ResultSource::Fallback,
            start.elapsed(),
        )
    }

    /// Pure scoring step: identical input always yields identical output.
    pub fn score(&self, text: &str) -> Classification {
        let tokens = tokenize(text);
        let (positive, negative) = accumulate(&tokens);

        let compound = (positive - negative) / (positive + negative).max(1.0);
        let label = if compound >= POSITIVE_THRESHOLD {
            Label::Positive
        } else if compound <= NEGATIVE_THRESHOLD {
            Label::Negative
        } else {
            Label::Neutral
        };
        let confidence = (0.5 + 0.5 * compound.abs()).min(self.config.confidence_ceiling);

        Classification {
            label,
            confidence,
            compound_score: compound,
            probabilities: Probabilities::from_confidence(label, confidence),
        }
    }
}

impl LocalClassifier for LexiconClassifier {
    fn name(&self) -> &str {
        LEXICON_MODEL
    }

    fn classify_local(&self, text: &str) -> Result<SentimentResult, ClassifierError> {
        Ok(self.classify(text))
    }
}

/// Clean and split text into lower-cased word tokens.
fn tokenize(text: &str) -> Vec<String> {
    let cleaned = URL_RE.replace_all(text, " ");
    let cleaned = MD_LINK_RE.replace_all(&cleaned, "$1");
    let cleaned = TAG_RE.replace_all(&cleaned, " ");

    cleaned
        .split_whitespace()
        .map(|raw| {
            raw.to_lowercase()
                .replace(['\u{2019}', '\''], "")
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

fn accumulate(tokens: &[String]) -> (f64, f64) {
    let mut positive = 0.0;
    let mut negative = 0.0;

    for (i, token) in tokens.iter().enumerate() {
        let is_positive = if POSITIVE_TERMS.contains(token.as_str()) {
            true
        } else if NEGATIVE_TERMS.contains(token.as_str()) {
            false
        } else {
            continue;
        };

        let mut weight = 1.0;
        let mut negated = false;
        for back in 1..=LOOKBACK.min(i) {
            let prev = tokens[i - back].as_str();
            if NEGATIONS.contains(prev) {
                negated = true;
            } else if let Some(multiplier) = INTENSIFIERS.get(prev) {
                weight *= multiplier;
            }
        }

        match (is_positive, negated) {
            (true, false) => positive += weight,
            (false, false) => negative += weight,
            (true, true) => negative += weight * NEGATION_SCALE,
            (false, true) => positive += weight * NEGATION_SCALE,
        }
    }

    (positive, negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> LexiconClassifier {
        LexiconClassifier::default()
    }

    #[test]
    fn test_empty_and_noise_are_neutral() {
        for text in ["", "   ", "!!!", "the table is in the room", "https://example.com/x"] {
            let result = lexicon().classify(text);
            assert_eq!(result.label(), Label::Neutral, "text: {:?}", text);
            assert_eq!(result.compound_score(), 0.0);
            assert_eq!(result.source(), ResultSource::Fallback);
        }
    }

    #[test]
    fn test_simple_polarity() {
        assert_eq!(lexicon().classify("I love this, it is great").label(), Label::Positive);
        assert_eq!(lexicon().classify("this is awful and I hate it").label(), Label::Negative);
    }

    #[test]
    fn test_negation_flips_polarity() {
        let c = lexicon().score("I am not happy");
        assert_eq!(c.label, Label::Negative);

        let c = lexicon().score("honestly this isn't bad");
        assert_eq!(c.label, Label::Positive);
    }

    #[test]
    fn test_negation_outside_window_is_ignored() {
        // "not" is three tokens before "good"
        let c = lexicon().score("not that it was good");
        assert_eq!(c.label, Label::Positive);
    }

    #[test]
    fn test_intensifier_scales_contribution() {
        let plain = lexicon().score("good but bad");
        assert_eq!(plain.label, Label::Neutral);

        let boosted = lexicon().score("good but very bad");
        assert!(boosted.compound_score < plain.compound_score);
        assert_eq!(boosted.label, Label::Negative);
    }

    #[test]
    fn test_compound_formula() {
        // pos = 1, neg = 1.8 → (1 - 1.8) / 2.8
        let c = lexicon().score("nice yet extremely sad");
        let expected = (1.0 - 1.8) / 2.8;
        assert!((c.compound_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_capped() {
        let c = lexicon().score("hopeless hopeless hopeless");
        assert_eq!(c.compound_score, -1.0);
        assert!((c.confidence - 0.95).abs() < 1e-9);

        let capped = LexiconClassifier::new(LexiconConfig { confidence_ceiling: 0.8, preview_chars: 100 });
        assert!((capped.score("hopeless").confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_probabilities_follow_confidence() {
        let c = lexicon().score("what a wonderful day");
        assert!((c.probabilities.get(c.label) - c.confidence).abs() < 1e-9);
        assert!((c.probabilities.sum() - 1.0).abs() < 1e-9);
        assert!(c.probabilities.neutral > c.probabilities.negative);
    }

    #[test]
    fn test_markup_and_urls_are_stripped() {
        let c = lexicon().score("<b>great</b> see https://bad.example.com/terrible and [awful](http://x.y)");
        // "great" is positive, "awful" survives as link text, URL words are gone
        assert_eq!(c.compound_score, 0.0);
    }

    #[test]
    fn test_curly_apostrophe_negation() {
        assert_eq!(lexicon().score("I don\u{2019}t feel good").label, Label::Negative);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let text = "I feel completely hopeless and want to end it all";
        assert_eq!(lexicon().score(text), lexicon().score(text));
        assert_eq!(lexicon().score(text).label, Label::Negative);
    }

    #[test]
    fn test_local_classifier_never_errors() {
        let result = lexicon().classify_local("anything at all").unwrap();
        assert_eq!(result.model_used(), LEXICON_MODEL);
    }
}
