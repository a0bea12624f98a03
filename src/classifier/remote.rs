// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote inference adapter.
//!
//! One HTTP round trip per call, bounded by the caller's timeout. Any
//! non-success status, transport error, timeout or malformed body is
//! surfaced as an [`InferenceError`]. There is deliberately no retry here:
//! the circuit breaker decides what happens after a failure.
//!
//! Wire format (`POST {base_url}/predict`):
//!
//! ```text
//! → {"text": "..."}
//! ← {"label": "negative", "confidence": 0.91,
//!    "compound_score": -0.82,                        (optional)
//!    "probabilities": {"positive": .., "negative": .., "neutral": ..}, (optional)
//!    "model": "distilbert-sst2"}                     (optional)
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sentiment::{Classification, Label, Probabilities, ResultSource, SentimentResult};

/// Model name used when the backend does not report one.
pub const REMOTE_MODEL: &str = "remote";

/// Transient failure talking to the inference backend.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("remote inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to connect to inference backend: {0}")]
    Connect(String),
    #[error("inference backend returned HTTP {code}")]
    Status { code: u16 },
    #[error("invalid inference response: {0}")]
    Decode(String),
    #[error("inference request failed: {0}")]
    Request(String),
}

impl InferenceError {
    /// Short category, used as a metrics label
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Request(_) => "request",
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Primary classification backend.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Classify `text` with a single attempt bounded by `timeout`.
    async fn try_classify(&self, text: &str, timeout: Duration) -> Result<SentimentResult, InferenceError>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(alias = "sentiment")]
    label: String,
    confidence: f64,
    #[serde(default, alias = "compound")]
    compound_score: Option<f64>,
    #[serde(default)]
    probabilities: Option<Probabilities>,
    #[serde(default, alias = "model_used")]
    model: Option<String>,
}

impl PredictResponse {
    fn into_classification(self) -> Result<(Classification, Option<String>), InferenceError> {
        let label: Label = self.label.parse().map_err(InferenceError::Decode)?;
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(InferenceError::Decode(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        let probabilities = match self.probabilities {
            Some(raw) => raw.normalized().ok_or_else(|| {
                InferenceError::Decode(format!(
                    "unusable probabilities (positive {}, negative {}, neutral {})",
                    raw.positive, raw.negative, raw.neutral
                ))
            })?,
            None => Probabilities::from_confidence(label, self.confidence),
        };
        let compound_score = self
            .compound_score
            .unwrap_or(probabilities.positive - probabilities.negative);

        Ok((
            Classification {
                label,
                confidence: self.confidence,
                compound_score,
                probabilities,
            },
            self.model,
        ))
    }
}

/// HTTP client for an inference service exposing `POST /predict`.
#[derive(Clone)]
pub struct HttpInferenceAdapter {
    client: Client,
    endpoint: String,
    preview_chars: usize,
}

impl HttpInferenceAdapter {
    pub fn new(base_url: &str, preview_chars: usize) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .build()
            .map_err(|e| InferenceError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/predict", base_url.trim_end_matches('/')),
            preview_chars,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteClassifier for HttpInferenceAdapter {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn try_classify(&self, text: &str, timeout: Duration) -> Result<SentimentResult, InferenceError> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&PredictRequest { text })
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status { code: status.as_u16() });
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, timeout))?;
        let (classification, model) = body.into_classification()?;

        Ok(SentimentResult::from_classification(
            text,
            self.preview_chars,
            classification,
            model.unwrap_or_else(|| REMOTE_MODEL.to_string()),
            ResultSource::Primary,
            start.elapsed(),
        ))
    }
}
