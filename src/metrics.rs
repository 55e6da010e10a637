//! Prometheus metrics for pipeline runs.
//!
//! Metrics live in a process-wide registry created by [`init_metrics`].
//! The `record_*` helpers are no-ops until then, so library code and tests
//! can call them unconditionally.

use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

/// Global registry for all newsreel metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Per-item stage outcomes, labeled by stage and status.
pub static STAGE_ITEMS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pipeline cycles, labeled by status (completed, skipped).
pub static CYCLES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of completed cycles.
pub static CYCLE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Result cache lookups, labeled by cache and outcome (hit, miss).
pub static CACHE_LOOKUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Create and register all metrics. Calling it again is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    static INIT: Mutex<()> = Mutex::new(());
    let _guard = INIT.lock().expect("metrics init lock poisoned");
    if REGISTRY.get().is_some() {
        return Ok(());
    }
    let registry = Registry::new();

    let stage_items = CounterVec::new(
        Opts::new(
            "newsreel_stage_items_total",
            "Items processed per stage by outcome",
        ),
        &["stage", "status"],
    )?;
    let cycles = CounterVec::new(
        Opts::new("newsreel_cycles_total", "Pipeline cycles by status"),
        &["status"],
    )?;
    let cycle_duration = Histogram::with_opts(
        HistogramOpts::new(
            "newsreel_cycle_duration_seconds",
            "Duration of completed pipeline cycles",
        )
        .buckets(vec![10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
    )?;
    let cache_lookups = CounterVec::new(
        Opts::new("newsreel_cache_lookups_total", "Result cache lookups"),
        &["cache", "outcome"],
    )?;

    registry.register(Box::new(stage_items.clone()))?;
    registry.register(Box::new(cycles.clone()))?;
    registry.register(Box::new(cycle_duration.clone()))?;
    registry.register(Box::new(cache_lookups.clone()))?;

    let _ = STAGE_ITEMS_TOTAL.set(stage_items);
    let _ = CYCLES_TOTAL.set(cycles);
    let _ = CYCLE_DURATION.set(cycle_duration);
    let _ = CACHE_LOOKUPS_TOTAL.set(cache_lookups);
    let _ = REGISTRY.set(registry);
    Ok(())
}

pub fn record_stage_item(stage: &str, status: &str) {
    if let Some(counter) = STAGE_ITEMS_TOTAL.get() {
        counter.with_label_values(&[stage, status]).inc();
    }
}

pub fn record_cycle_skipped() {
    if let Some(counter) = CYCLES_TOTAL.get() {
        counter.with_label_values(&["skipped"]).inc();
    }
}

pub fn record_cycle_completed(duration: Duration) {
    if let Some(counter) = CYCLES_TOTAL.get() {
        counter.with_label_values(&["completed"]).inc();
    }
    if let Some(histogram) = CYCLE_DURATION.get() {
        histogram.observe(duration.as_secs_f64());
    }
}

pub fn record_cache_lookup(cache: &str, hit: bool) {
    if let Some(counter) = CACHE_LOOKUPS_TOTAL.get() {
        let outcome = if hit { "hit" } else { "miss" };
        counter.with_label_values(&[cache, outcome]).inc();
    }
}

/// Render all metrics in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let Some(registry) = REGISTRY.get() else {
        return Ok(String::new());
    };
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Write the current metrics to `path`, textfile-collector style.
///
/// The file is replaced through a temporary sibling, never written in place.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let text = gather_text().map_err(|e| std::io::Error::other(e.to_string()))?;
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, path).await
}
