//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by volusphere and provides
//! functions for initializing, recording, and exporting them. Recording
//! helpers are no-ops until [`init_metrics`] runs, so library consumers that
//! never initialize metrics pay nothing.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

use crate::pipeline::Stage;

/// Global Prometheus registry for all volusphere metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total stage executions, labeled by stage and outcome.
pub static STAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Stage execution duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of work items ready for delivery.
pub static QUEUE_READY: OnceLock<Gauge> = OnceLock::new();

/// Number of work items currently leased to workers.
pub static QUEUE_IN_FLIGHT: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently executing a stage.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total jobs that completed the full pipeline.
pub static PIPELINES_COMPLETED: OnceLock<Counter> = OnceLock::new();

/// Total experiences published.
pub static EXPERIENCES_PUBLISHED: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Calling it
/// again is harmless; the first registration wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Stage metrics
    let stages_total = CounterVec::new(
        Opts::new("volusphere_stages_total", "Total stage executions"),
        &["stage", "outcome"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "volusphere_stage_duration_seconds",
            "Stage execution duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["stage"],
    )?;

    // Queue metrics
    let queue_ready = Gauge::new(
        "volusphere_queue_ready",
        "Number of work items ready for delivery",
    )?;

    let queue_in_flight = Gauge::new(
        "volusphere_queue_in_flight",
        "Number of work items currently leased to workers",
    )?;

    // Worker metrics
    let active_workers = Gauge::new(
        "volusphere_active_workers",
        "Number of workers currently executing a stage",
    )?;

    // Outcome metrics
    let pipelines_completed = Counter::new(
        "volusphere_pipelines_completed_total",
        "Total jobs that completed the full pipeline",
    )?;

    let experiences_published = Counter::new(
        "volusphere_experiences_published_total",
        "Total experiences published",
    )?;

    // Register all metrics with the registry
    registry.register(Box::new(stages_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(queue_ready.clone()))?;
    registry.register(Box::new(queue_in_flight.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(pipelines_completed.clone()))?;
    registry.register(Box::new(experiences_published.clone()))?;

    // Store metrics in static variables
    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = STAGES_TOTAL.set(stages_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = QUEUE_READY.set(queue_ready);
    let _ = QUEUE_IN_FLIGHT.set(queue_in_flight);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = PIPELINES_COMPLETED.set(pipelines_completed);
    let _ = EXPERIENCES_PUBLISHED.set(experiences_published);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Records one stage execution with its outcome and duration.
pub fn record_stage(stage: Stage, outcome: &str, duration_secs: f64) {
    if let Some(counter) = STAGES_TOTAL.get() {
        counter
            .with_label_values(&[&stage.to_string(), outcome])
            .inc();
    }
    if let Some(histogram) = STAGE_DURATION.get() {
        histogram
            .with_label_values(&[&stage.to_string()])
            .observe(duration_secs);
    }
}

/// Updates the queue depth gauges.
pub fn set_queue_depth(ready: i64, in_flight: i64) {
    if let Some(gauge) = QUEUE_READY.get() {
        gauge.set(ready as f64);
    }
    if let Some(gauge) = QUEUE_IN_FLIGHT.get() {
        gauge.set(in_flight as f64);
    }
}

/// Updates the active worker gauge.
pub fn set_active_workers(count: i64) {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.set(count as f64);
    }
}

/// Records a job finishing the full pipeline.
pub fn record_pipeline_completed() {
    if let Some(counter) = PIPELINES_COMPLETED.get() {
        counter.inc();
    }
}

/// Records an experience being published.
pub fn record_experience_published() {
    if let Some(counter) = EXPERIENCES_PUBLISHED.get() {
        counter.inc();
    }
}

/// Export all registered metrics in Prometheus text format.
///
/// Gathers all metrics from the registry and encodes them in the text
/// exposition format, suitable for scraping by a Prometheus server.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
