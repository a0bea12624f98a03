// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{SentimentStore, StorageError, StoreCounts, StoredAlert, StoredSentiment};
use crate::alerting::{Alert, ContentMetadata};
use crate::ingest::queue::MetricRecord;
use crate::sentiment::SentimentResult;

/// Stored content row: metadata plus the result it was linked to.
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub id: i64,
    pub content: ContentMetadata,
    pub related_result_id: Option<i64>,
}

/// In-process store, used when no SQL backend is configured and in tests.
pub struct InMemoryStore {
    sentiments: DashMap<String, StoredSentiment>,
    contents: DashMap<String, StoredContent>,
    alerts: DashMap<(String, String), StoredAlert>,
    metrics: DashMap<i64, MetricRecord>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sentiments: DashMap::new(),
            contents: DashMap::new(),
            alerts: DashMap::new(),
            metrics: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of stored sentiment results
    #[must_use]
    pub fn len(&self) -> usize {
        self.sentiments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sentiments.is_empty()
    }

    pub fn content(&self, content_id: &str) -> Option<StoredContent> {
        self.contents.get(content_id).map(|r| r.value().clone())
    }

    pub fn metrics_named(&self, name: &str) -> Vec<MetricRecord> {
        self.metrics
            .iter()
            .filter(|r| r.value().name == name)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Clear all rows
    pub fn clear(&self) {
        self.sentiments.clear();
        self.contents.clear();
        self.alerts.clear();
        self.metrics.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn store_sentiment_result(&self, result: &SentimentResult) -> Result<i64, StorageError> {
        match self.sentiments.entry(result.text_hash().to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().id),
            Entry::Vacant(slot) => {
                let id = self.allocate_id();
                slot.insert(StoredSentiment::from_result(id, result));
                Ok(id)
            }
        }
    }

    async fn store_content_metadata(
        &self,
        content: &ContentMetadata,
        related_result_id: Option<i64>,
    ) -> Result<i64, StorageError> {
        match self.contents.entry(content.content_id.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().id),
            Entry::Vacant(slot) => {
                let id = self.allocate_id();
                slot.insert(StoredContent {
                    id,
                    content: content.clone(),
                    related_result_id,
                });
                Ok(id)
            }
        }
    }

    async fn store_alert(&self, alert: &Alert, related_result_id: Option<i64>) -> Result<i64, StorageError> {
        let key = (alert.content_id.clone(), alert.alert_type.as_str().to_string());
        match self.alerts.entry(key) {
            Entry::Occupied(existing) => Ok(existing.get().id),
            Entry::Vacant(slot) => {
                let id = self.allocate_id();
                slot.insert(StoredAlert {
                    id,
                    content_id: alert.content_id.clone(),
                    alert_type: alert.alert_type.as_str().to_string(),
                    severity: alert.severity,
                    priority: alert.priority,
                    keywords_found: alert.keywords_found.clone(),
                    status: alert.status.as_str().to_string(),
                    related_result_id,
                });
                Ok(id)
            }
        }
    }

    async fn store_metric(&self, metric: &MetricRecord) -> Result<i64, StorageError> {
        let id = self.allocate_id();
        self.metrics.insert(id, metric.clone());
        Ok(id)
    }

    async fn find_result_id(&self, text_hash: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.sentiments.get(text_hash).map(|r| r.value().id))
    }

    async fn fetch_sentiment(&self, text_hash: &str) -> Result<Option<StoredSentiment>, StorageError> {
        Ok(self.sentiments.get(text_hash).map(|r| r.value().clone()))
    }

    async fn fetch_alerts(&self, content_id: &str) -> Result<Vec<StoredAlert>, StorageError> {
        let mut alerts: Vec<StoredAlert> = self
            .alerts
            .iter()
            .filter(|r| r.value().content_id == content_id)
            .map(|r| r.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.id);
        Ok(alerts)
    }

    async fn counts(&self) -> Result<StoreCounts, StorageError> {
        Ok(StoreCounts {
            sentiments: self.sentiments.len() as u64,
            contents: self.contents.len() as u64,
            alerts: self.alerts.len() as u64,
            metrics: self.metrics.len() as u64,
        })
    }
}
