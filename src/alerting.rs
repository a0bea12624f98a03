// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyword/severity alerting.
//!
//! [`AlertEngine::detect`] is a pure function of (content, classification):
//! it scans the normalized text against a keyword table and, on the first
//! matching alert type, derives a severity from the compound score.
//!
//! # Alert type priority
//!
//! When several types match, the first rule in table order wins. The
//! default table is ordered `mental_health > harassment > academic > stress`.
//!
//! # Severity
//!
//! | compound score | severity |
//! |----------------|----------|
//! | `< -0.5`       | high     |
//! | `< -0.2`       | medium   |
//! | otherwise      | low      |
//!
//! Mental-health alerts are never lower than medium. `critical` is never
//! produced here; it is reserved for downstream review escalation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::sentiment::{now_millis, Label, SentimentResult};

/// Where a piece of content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Post,
    Comment,
    ApiRequest,
}

impl ContentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::ApiRequest => "api_request",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "comment" => Ok(Self::Comment),
            "api_request" => Ok(Self::ApiRequest),
            other => Err(format!("unknown content type '{}'", other)),
        }
    }
}

/// Originating content for a classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub content_id: String,
    pub text: String,
    pub content_type: ContentType,
    pub subreddit: Option<String>,
    pub author: Option<String>,
}

impl ContentMetadata {
    pub fn new(content_id: impl Into<String>, text: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            content_id: content_id.into(),
            text: text.into(),
            content_type,
            subreddit: None,
            author: None,
        }
    }

    /// Content submitted directly through the API, with a generated id.
    pub fn api_request(text: impl Into<String>) -> Self {
        Self::new(format!("api_{}", uuid::Uuid::new_v4().simple()), text, ContentType::ApiRequest)
    }

    #[must_use]
    pub fn with_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Category of a safety alert. Open-ended via [`AlertType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertType {
    MentalHealth,
    Harassment,
    Academic,
    Stress,
    Custom(String),
}

impl AlertType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MentalHealth => "mental_health",
            Self::Harassment => "harassment",
            Self::Academic => "academic",
            Self::Stress => "stress",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mental_health" => Self::MentalHealth,
            "harassment" => Self::Harassment,
            "academic" => Self::Academic,
            "stress" => Self::Stress,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl Serialize for AlertType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank, 1 (low) to 4 (critical)
    #[must_use]
    pub fn rank(&self) -> i32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Severity band for a compound score.
    #[must_use]
    pub fn from_compound(compound: f64) -> Self {
        if compound < -0.5 {
            Self::High
        } else if compound < -0.2 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Review status. Detection always produces `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

/// Immutable safety alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub content_id: String,
    pub content_text: String,
    pub content_type: ContentType,
    pub alert_type: AlertType,
    pub severity: Severity,
    /// Matched trigger terms, in table order
    pub keywords_found: Vec<String>,
    pub priority: i32,
    pub status: AlertStatus,
    pub subreddit: Option<String>,
    pub author: Option<String>,
    /// Hash of the classified text, links the alert to its sentiment row
    pub text_hash: String,
    pub sentiment_label: Label,
    pub compound_score: f64,
    pub created_at: i64,
}

/// Keywords that trigger one alert type.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub alert_type: AlertType,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new<I, S>(alert_type: AlertType, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            alert_type,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}

/// Stateless detector over an ordered keyword table.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    rules: Vec<KeywordRule>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(
                AlertType::MentalHealth,
                [
                    "suicide", "suicidal", "kill myself", "end it all", "want to die",
                    "no reason to live", "self harm", "hopeless", "worthless", "depressed",
                    "can't go on",
                ],
            ),
            KeywordRule::new(
                AlertType::Harassment,
                [
                    "harassed", "harassment", "harassing", "bullied", "bullying", "stalking",
                    "stalked", "threatened", "threatening me", "abused", "doxxed",
                ],
            ),
            KeywordRule::new(
                AlertType::Academic,
                [
                    "failing my", "failed my", "exam", "exams", "finals", "midterm", "midterms",
                    "gpa", "dropping out", "academic probation", "thesis", "deadline",
                ],
            ),
            KeywordRule::new(
                AlertType::Stress,
                [
                    "stressed", "stressed out", "overwhelmed", "burnout", "burned out",
                    "anxious", "anxiety", "panic attack", "can't cope", "exhausted",
                ],
            ),
        ])
    }
}

impl AlertEngine {
    /// Engine over `rules`; earlier rules take priority.
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// Append a lower-priority rule.
    #[must_use]
    pub fn with_rule(mut self, rule: KeywordRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Derive at most one alert for `content` classified as `result`.
    pub fn detect(&self, content: &ContentMetadata, result: &SentimentResult) -> Option<Alert> {
        let haystack = normalize(&content.text);

        for rule in &self.rules {
            let mut keywords_found: Vec<String> = Vec::new();
            for keyword in &rule.keywords {
                let needle = normalize(keyword);
                if needle.trim().is_empty() || keywords_found.contains(keyword) {
                    continue;
                }
                if haystack.contains(&needle) {
                    keywords_found.push(keyword.clone());
                }
            }
            if keywords_found.is_empty() {
                continue;
            }

            let severity = escalate(&rule.alert_type, Severity::from_compound(result.compound_score()));
            let priority = priority_for(&rule.alert_type, severity);

            debug!(
                content_id = %content.content_id,
                alert_type = %rule.alert_type,
                severity = %severity,
                keywords = keywords_found.len(),
                "Alert detected"
            );
            crate::metrics::record_alert(rule.alert_type.as_str(), severity.as_str());

            return Some(Alert {
                content_id: content.content_id.clone(),
                content_text: content.text.clone(),
                content_type: content.content_type,
                alert_type: rule.alert_type.clone(),
                severity,
                keywords_found,
                priority,
                status: AlertStatus::Active,
                subreddit: content.subreddit.clone(),
                author: content.author.clone(),
                text_hash: result.text_hash().to_string(),
                sentiment_label: result.label(),
                compound_score: result.compound_score(),
                created_at: now_millis(),
            });
        }

        None
    }
}

fn escalate(alert_type: &AlertType, severity: Severity) -> Severity {
    match alert_type {
        AlertType::MentalHealth => severity.max(Severity::Medium),
        _ => severity,
    }
}

fn priority_for(alert_type: &AlertType, severity: Severity) -> i32 {
    match alert_type {
        AlertType::MentalHealth => severity.rank() + 1,
        _ => severity.rank(),
    }
}

/// Lower-case, collapse every non-alphanumeric run to one space and pad
/// both ends, so ` keyword ` only matches on word boundaries.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_space = false;
        } else if ch == '\'' || ch == '\u{2019}' {
            // "can't" and "cant" both normalize to "cant"
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}
