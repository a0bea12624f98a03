// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sentiment classifiers.
//!
//! - [`lexicon`]: in-process fallback scorer, always available
//! - [`remote`]: network adapter for the primary inference backend

pub mod lexicon;
pub mod remote;

use thiserror::Error;

use crate::sentiment::SentimentResult;

/// Failure of an in-process classifier.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("local classifier unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous, in-process classifier used on the fallback path.
///
/// The lexicon implementation never fails; the `Result` exists so the
/// failsafe client can still degrade to a neutral default if a different
/// local classifier is plugged in.
pub trait LocalClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify_local(&self, text: &str) -> Result<SentimentResult, ClassifierError>;
}
