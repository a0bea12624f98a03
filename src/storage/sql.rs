// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend (SQLite or MySQL through the sqlx `Any` driver).
//!
//! Schema (SQLite flavour):
//! ```sql
//! CREATE TABLE sentiment_results (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   text_hash TEXT NOT NULL UNIQUE,   -- dedup key
//!   text TEXT NOT NULL,               -- bounded preview
//!   label TEXT, confidence REAL, compound_score REAL,
//!   prob_positive REAL, prob_negative REAL, prob_neutral REAL,
//!   processing_time_ms REAL, model_used TEXT, source TEXT,
//!   circuit_state TEXT, created_at INTEGER
//! );
//! CREATE TABLE content_items (... content_id UNIQUE, related_result_id ...);
//! CREATE TABLE alerts (... UNIQUE (content_id, alert_type), related_result_id ...);
//! CREATE TABLE metric_records (... name, value, labels, recorded_at);
//! ```
//!
//! Inserts with a natural key use `INSERT OR IGNORE` (SQLite) /
//! `INSERT IGNORE` (MySQL) followed by a lookup, so a replayed write returns
//! the id of the row that already exists.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver hands MySQL TEXT columns back as BLOB, so text columns
//! are read as `String` first and as UTF-8 bytes second.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyConnection, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use super::traits::{SentimentStore, StorageError, StoreCounts, StoredAlert, StoredSentiment};
use crate::alerting::{Alert, ContentMetadata};
use crate::ingest::queue::MetricRecord;
use crate::resilience::retry::{retry, RetryConfig};
use crate::sentiment::{now_millis, Probabilities, SentimentResult};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sentiment_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text_hash TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL,
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        compound_score REAL NOT NULL,
        prob_positive REAL NOT NULL,
        prob_negative REAL NOT NULL,
        prob_neutral REAL NOT NULL,
        processing_time_ms REAL NOT NULL,
        model_used TEXT NOT NULL,
        source TEXT NOT NULL,
        circuit_state TEXT,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS content_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_id TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL,
        content_type TEXT NOT NULL,
        subreddit TEXT,
        author TEXT,
        related_result_id INTEGER,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_id TEXT NOT NULL,
        content_text TEXT NOT NULL,
        content_type TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        priority INTEGER NOT NULL,
        keywords_found TEXT NOT NULL,
        status TEXT NOT NULL,
        subreddit TEXT,
        author TEXT,
        text_hash TEXT NOT NULL,
        related_result_id INTEGER,
        created_at INTEGER NOT NULL,
        UNIQUE (content_id, alert_type)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS metric_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        value REAL NOT NULL,
        labels TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    )"#,
];

const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sentiment_results (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        text_hash VARCHAR(64) NOT NULL UNIQUE,
        text TEXT NOT NULL,
        label VARCHAR(16) NOT NULL,
        confidence DOUBLE NOT NULL,
        compound_score DOUBLE NOT NULL,
        prob_positive DOUBLE NOT NULL,
        prob_negative DOUBLE NOT NULL,
        prob_neutral DOUBLE NOT NULL,
        processing_time_ms DOUBLE NOT NULL,
        model_used VARCHAR(128) NOT NULL,
        source VARCHAR(16) NOT NULL,
        circuit_state VARCHAR(16),
        created_at BIGINT NOT NULL,
        INDEX idx_label (label),
        INDEX idx_created_at (created_at)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS content_items (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        content_id VARCHAR(255) NOT NULL UNIQUE,
        text TEXT NOT NULL,
        content_type VARCHAR(16) NOT NULL,
        subreddit VARCHAR(255),
        author VARCHAR(255),
        related_result_id BIGINT,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS alerts (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        content_id VARCHAR(255) NOT NULL,
        content_text TEXT NOT NULL,
        content_type VARCHAR(16) NOT NULL,
        alert_type VARCHAR(64) NOT NULL,
        severity VARCHAR(16) NOT NULL,
        priority INT NOT NULL,
        keywords_found TEXT NOT NULL,
        status VARCHAR(16) NOT NULL,
        subreddit VARCHAR(255),
        author VARCHAR(255),
        text_hash VARCHAR(64) NOT NULL,
        related_result_id BIGINT,
        created_at BIGINT NOT NULL,
        UNIQUE KEY uq_content_alert (content_id, alert_type),
        INDEX idx_priority (priority)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS metric_records (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        value DOUBLE NOT NULL,
        labels TEXT NOT NULL,
        recorded_at BIGINT NOT NULL,
        INDEX idx_name (name)
    )"#,
];

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect and create tables, with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        let in_memory = is_sqlite && connection_string.contains(":memory:");

        // Every connection to `sqlite::memory:` opens its own database, so an
        // in-memory store keeps exactly one connection alive forever.
        let options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new()
                .max_connections(10)
                .idle_timeout(Duration::from_secs(300))
        };
        let options = options.acquire_timeout(Duration::from_secs(10));

        let pool = retry("sql_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                options
                    .connect(connection_string)
                    .await
                    .map_err(backend_err)
            }
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite && !in_memory {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = if self.is_sqlite { SQLITE_SCHEMA } else { MYSQL_SCHEMA };
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    fn insert_ignore(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT OR IGNORE INTO"
        } else {
            "INSERT IGNORE INTO"
        }
    }

    async fn insert_sentiment(&self, conn: &mut AnyConnection, result: &SentimentResult) -> Result<i64, StorageError> {
        let sql = format!(
            "{} sentiment_results (text_hash, text, label, confidence, compound_score, \
             prob_positive, prob_negative, prob_neutral, processing_time_ms, model_used, source, \
             circuit_state, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.insert_ignore()
        );
        let probabilities = result.probabilities();

        sqlx::query(&sql)
            .bind(result.text_hash())
            .bind(result.text())
            .bind(result.label().as_str())
            .bind(result.confidence())
            .bind(result.compound_score())
            .bind(probabilities.positive)
            .bind(probabilities.negative)
            .bind(probabilities.neutral)
            .bind(result.processing_time_ms())
            .bind(result.model_used())
            .bind(result.source().as_str())
            .bind(result.circuit_state().map(|s| s.to_string()))
            .bind(result.created_at())
            .execute(&mut *conn)
            .await
            .map_err(backend_err)?;

        lookup_id(conn, "SELECT id FROM sentiment_results WHERE text_hash = ?", result.text_hash()).await
    }

    async fn insert_alert(
        &self,
        conn: &mut AnyConnection,
        alert: &Alert,
        related_result_id: Option<i64>,
    ) -> Result<i64, StorageError> {
        let sql = format!(
            "{} alerts (content_id, content_text, content_type, alert_type, severity, priority, \
             keywords_found, status, subreddit, author, text_hash, related_result_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.insert_ignore()
        );
        let keywords = serde_json::to_string(&alert.keywords_found)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(&sql)
            .bind(&alert.content_id)
            .bind(&alert.content_text)
            .bind(alert.content_type.as_str())
            .bind(alert.alert_type.as_str())
            .bind(alert.severity.as_str())
            .bind(alert.priority)
            .bind(keywords)
            .bind(alert.status.as_str())
            .bind(alert.subreddit.clone())
            .bind(alert.author.clone())
            .bind(&alert.text_hash)
            .bind(related_result_id)
            .bind(alert.created_at)
            .execute(&mut *conn)
            .await
            .map_err(backend_err)?;

        let row = sqlx::query("SELECT id FROM alerts WHERE content_id = ? AND alert_type = ?")
            .bind(&alert.content_id)
            .bind(alert.alert_type.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(backend_err)?;
        row.try_get("id").map_err(backend_err)
    }

    async fn insert_metric(&self, conn: &mut AnyConnection, metric: &MetricRecord) -> Result<i64, StorageError> {
        let labels = serde_json::to_string(&metric.labels)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let result = sqlx::query("INSERT INTO metric_records (name, value, labels, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(&metric.name)
            .bind(metric.value)
            .bind(labels)
            .bind(metric.recorded_at)
            .execute(&mut *conn)
            .await
            .map_err(backend_err)?;

        result
            .last_insert_id()
            .ok_or_else(|| StorageError::Backend("driver did not report an insert id".to_string()))
    }

    async fn count(&self, table: &str) -> Result<u64, StorageError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) as cnt FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        let count: i64 = row.try_get("cnt").map_err(backend_err)?;
        Ok(count as u64)
    }
}

async fn lookup_id(conn: &mut AnyConnection, sql: &str, key: &str) -> Result<i64, StorageError> {
    let row = sqlx::query(sql)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(backend_err)?;
    row.try_get("id").map_err(backend_err)
}

/// Read a text column as String (SQLite) or UTF-8 bytes (MySQL through `Any`).
fn get_text(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn required_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    get_text(row, column).ok_or_else(|| StorageError::Serialization(format!("column '{}' missing or not text", column)))
}

fn parse_sentiment(row: &AnyRow) -> Result<StoredSentiment, StorageError> {
    let get_f64 = |column: &str| -> Result<f64, StorageError> { row.try_get::<f64, _>(column).map_err(backend_err) };

    Ok(StoredSentiment {
        id: row.try_get("id").map_err(backend_err)?,
        text_hash: required_text(row, "text_hash")?,
        text: required_text(row, "text")?,
        label: required_text(row, "label")?
            .parse()
            .map_err(StorageError::Serialization)?,
        confidence: get_f64("confidence")?,
        compound_score: get_f64("compound_score")?,
        probabilities: Probabilities::new(get_f64("prob_positive")?, get_f64("prob_negative")?, get_f64("prob_neutral")?),
        processing_time_ms: get_f64("processing_time_ms")?,
        model_used: required_text(row, "model_used")?,
        source: required_text(row, "source")?
            .parse()
            .map_err(StorageError::Serialization)?,
        circuit_state: get_text(row, "circuit_state"),
        created_at: row.try_get("created_at").map_err(backend_err)?,
    })
}

fn parse_alert(row: &AnyRow) -> Result<StoredAlert, StorageError> {
    let keywords = required_text(row, "keywords_found")?;
    let priority: i64 = row.try_get("priority").map_err(backend_err)?;

    Ok(StoredAlert {
        id: row.try_get("id").map_err(backend_err)?,
        content_id: required_text(row, "content_id")?,
        alert_type: required_text(row, "alert_type")?,
        severity: required_text(row, "severity")?
            .parse()
            .map_err(StorageError::Serialization)?,
        priority: priority as i32,
        keywords_found: serde_json::from_str(&keywords).map_err(|e| StorageError::Serialization(e.to_string()))?,
        status: required_text(row, "status")?,
        related_result_id: row.try_get::<Option<i64>, _>("related_result_id").map_err(backend_err)?,
    })
}

#[async_trait]
impl SentimentStore for SqlStore {
    fn backend(&self) -> &'static str {
        if self.is_sqlite {
            "sqlite"
        } else {
            "mysql"
        }
    }

    async fn store_sentiment_result(&self, result: &SentimentResult) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend_err)?;
        self.insert_sentiment(&mut conn, result).await
    }

    /// One transaction per group: either every row lands or none do.
    async fn store_sentiment_batch(&self, results: &[SentimentResult]) -> Result<Vec<i64>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            ids.push(self.insert_sentiment(&mut tx, result).await?);
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(ids)
    }

    async fn store_content_metadata(
        &self,
        content: &ContentMetadata,
        related_result_id: Option<i64>,
    ) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend_err)?;
        let sql = format!(
            "{} content_items (content_id, text, content_type, subreddit, author, related_result_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.insert_ignore()
        );

        sqlx::query(&sql)
            .bind(&content.content_id)
            .bind(&content.text)
            .bind(content.content_type.as_str())
            .bind(content.subreddit.clone())
            .bind(content.author.clone())
            .bind(related_result_id)
            .bind(now_millis())
            .execute(&mut *conn)
            .await
            .map_err(backend_err)?;

        lookup_id(&mut conn, "SELECT id FROM content_items WHERE content_id = ?", &content.content_id).await
    }

    async fn store_alert(&self, alert: &Alert, related_result_id: Option<i64>) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend_err)?;
        self.insert_alert(&mut conn, alert, related_result_id).await
    }

    async fn store_alert_batch(&self, alerts: &[(Alert, Option<i64>)]) -> Result<Vec<i64>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let mut ids = Vec::with_capacity(alerts.len());
        for (alert, related) in alerts {
            ids.push(self.insert_alert(&mut tx, alert, *related).await?);
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(ids)
    }

    async fn store_metric(&self, metric: &MetricRecord) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend_err)?;
        self.insert_metric(&mut conn, metric).await
    }

    async fn store_metric_batch(&self, metrics: &[MetricRecord]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        for metric in metrics {
            self.insert_metric(&mut tx, metric).await?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(metrics.len())
    }

    async fn find_result_id(&self, text_hash: &str) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query("SELECT id FROM sentiment_results WHERE text_hash = ?")
            .bind(text_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| r.try_get("id").map_err(backend_err)).transpose()
    }

    async fn fetch_sentiment(&self, text_hash: &str) -> Result<Option<StoredSentiment>, StorageError> {
        let row = sqlx::query(
            "SELECT id, text_hash, text, label, confidence, compound_score, prob_positive, prob_negative, \
             prob_neutral, processing_time_ms, model_used, source, circuit_state, created_at \
             FROM sentiment_results WHERE text_hash = ?",
        )
        .bind(text_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.as_ref().map(parse_sentiment).transpose()
    }

    async fn fetch_alerts(&self, content_id: &str) -> Result<Vec<StoredAlert>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, content_id, alert_type, severity, priority, keywords_found, status, related_result_id \
             FROM alerts WHERE content_id = ? ORDER BY id",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter().map(parse_alert).collect()
    }

    async fn counts(&self) -> Result<StoreCounts, StorageError> {
        Ok(StoreCounts {
            sentiments: self.count("sentiment_results").await?,
            contents: self.count("content_items").await?,
            alerts: self.count("alerts").await?,
            metrics: self.count("metric_records").await?,
        })
    }
}
