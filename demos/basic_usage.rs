// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic sentiment-engine usage example.
//!
//! Demonstrates:
//! 1. Configuring an engine whose remote backend is unreachable
//! 2. Analyzing posts while the circuit breaker trips and the lexicon takes over
//! 3. Batch prediction with a summary
//! 4. Draining the queue on stop and reading results back
//! 5. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=sentiment_engine=debug cargo run --example basic_usage
//! ```
//!
//! Set `SQL_URL` (e.g. `sqlite:demo.db`) to persist to SQL instead of memory.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use sentiment_engine::{ContentMetadata, ContentType, SentimentEngine, SentimentEngineConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentiment_engine=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║          sentiment-engine: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring sentiment-engine...");

    let config = SentimentEngineConfig {
        // Nothing listens here, so every remote call fails fast
        remote_service_url: Some("http://127.0.0.1:9".into()),
        remote_timeout_ms: 200,
        failure_threshold: 3,
        recovery_timeout_ms: 10_000,
        batch_size: 10,
        batch_timeout_ms: 250,
        sql_url: std::env::var("SQL_URL").ok(),
        ..Default::default()
    };

    let engine = SentimentEngine::new(config).await?;
    println!("   State: {}", engine.state());

    println!("\n🚀 Starting batch worker...");
    engine.start()?;
    println!("   ✅ State: {}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Analyze posts (breaker trips after three failures)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Analyzing posts...");

    let posts = [
        ("t3_001", "Finally finished my thesis, feeling amazing!", ContentType::Post),
        ("t3_002", "Finals week is brutal, I'm so stressed and overwhelmed", ContentType::Post),
        ("t1_003", "Honestly the lecture was fine", ContentType::Comment),
        ("t3_004", "I feel completely hopeless and want to end it all", ContentType::Post),
        ("t1_005", "Thanks everyone, this community is great", ContentType::Comment),
    ];

    for (id, text, kind) in posts {
        let content = ContentMetadata::new(id, text, kind).with_subreddit("university");
        let analysis = engine.analyze(content).await;
        let result = &analysis.result;

        println!(
            "   └─ {} → {} ({:.2}) via {} [circuit: {}]",
            id,
            result.label(),
            result.compound_score(),
            result.source(),
            result.circuit_state().map(|s| s.to_string()).unwrap_or_default(),
        );
        if let Some(alert) = &analysis.alert {
            println!(
                "      ⚠️  {} alert, severity {}, priority {}, keywords {:?}",
                alert.alert_type.as_str(),
                alert.severity.as_str(),
                alert.priority,
                alert.keywords_found
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Batch prediction (classification only)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Batch prediction...");
    let batch = engine
        .predict_batch(&["great day", "awful commute", "it is what it is", "not bad at all"])
        .await;
    let summary = &batch.summary;
    println!("   └─ total={} succeeded={} failed={}", summary.total, summary.succeeded, summary.failed);
    println!(
        "   └─ labels: +{} -{} ={}",
        summary.labels.positive, summary.labels.negative, summary.labels.neutral
    );
    println!(
        "   └─ latency: total {:.2}ms, avg {:.2}ms, majority path {:?}",
        summary.total_ms, summary.average_ms, summary.majority_source
    );

    engine.record_metric("demo_runs", 1.0, [("example", "basic_usage")])?;

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Stop (drains the queue) and read back
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Stopping (draining queue)...");
    let stats = engine.stop().await?;
    println!(
        "   ✅ processed={} retried={} failed={} batches={}",
        stats.processed, stats.retried, stats.failed, stats.batches
    );

    let status = engine.status();
    println!("\n📍 Status:");
    println!("   ├─ State: {}", status.state);
    println!(
        "   ├─ Circuit: {} (failures={}, rejections={})",
        status.circuit.state, status.circuit.failure_count, status.circuit.rejections
    );
    println!("   ├─ Queue: {}/{} ({})", status.queue.depth, status.queue.capacity, status.backpressure.description());
    println!("   └─ Store: {}", status.store_backend);

    let counts = engine.store().counts().await?;
    println!(
        "\n💾 Stored: {} results, {} contents, {} alerts, {} metrics",
        counts.sentiments, counts.contents, counts.alerts, counts.metrics
    );
    for alert in engine.store().fetch_alerts("t3_004").await? {
        println!(
            "   └─ alert #{} on t3_004: {} / {:?} (result #{:?})",
            alert.id, alert.alert_type, alert.severity, alert.related_result_id
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print captured metrics grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {} = {}", name, value);
    }
    println!("   ├─ Gauges");
    for (name, value) in &gauges {
        println!("   │  └─ {} = {:.2}", name, value);
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
        println!("      └─ {} count={} avg={:.4}", name, count, avg);
    }
}
