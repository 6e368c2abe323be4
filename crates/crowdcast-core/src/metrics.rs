//! Prometheus metrics for the forecasting core.
//!
//! Statics register themselves with the default registry on first touch;
//! `render` encodes whatever has been registered so far.

use once_cell::sync::Lazy;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, TextEncoder,
};

pub static OBSERVATIONS_INGESTED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_observations_ingested_total",
        "Observations applied to a zone model",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static OBSERVATIONS_REJECTED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_observations_rejected_total",
        "Observations rejected at validation",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static OBSERVATIONS_IGNORED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_observations_ignored_total",
        "Duplicate or out-of-order observations skipped",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ZONES_REGISTERED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_zones_registered_total",
        "Zones registered dynamically on first observation",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ZONES_EVICTED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_zones_evicted_total",
        "Zones evicted to stay under the store bound",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ACTIVE_ZONES: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new("crowdcast_active_zones", "Zones currently held by the store").unwrap();
    prometheus::register(Box::new(g.clone())).unwrap();
    g
});

pub static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("crowdcast_cycles_total", "Forecast cycles by outcome"),
        &["outcome"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ZONE_FALLBACKS: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_zone_fallbacks_total",
        "Per-zone predictions that fell back to the last observed count",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "crowdcast_cycle_duration_seconds",
            "Wall time of one forecast cycle",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .unwrap();
    prometheus::register(Box::new(h.clone())).unwrap();
    h
});

pub static PERSISTENCE_WRITTEN: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_persistence_written_total",
        "Records written by the persistence sink",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static PERSISTENCE_FAILED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_persistence_failed_total",
        "Records given up on after retries",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static PERSISTENCE_DROPPED: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "crowdcast_persistence_dropped_total",
        "Records dropped because the persistence queue was full",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static CACHE_HITS: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("crowdcast_cache_hits_total", "Prediction cache hits").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static CACHE_MISSES: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("crowdcast_cache_misses_total", "Prediction cache misses").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

/// Text exposition of every registered metric.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_touched_metrics() {
        CACHE_HITS.inc();
        CYCLES_TOTAL.with_label_values(&["completed"]).inc();
        let text = render();
        assert!(text.contains("crowdcast_cache_hits_total"));
        assert!(text.contains("crowdcast_cycles_total{outcome=\"completed\"}"));
    }
}
