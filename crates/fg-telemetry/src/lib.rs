//! Process-wide metrics accumulator for the gateway.
//!
//! [`MetricsAccumulator`] holds a handful of monotonic named counters plus a
//! bounded latency-sample reservoir. Counters are lock-free atomics; the
//! reservoir is guarded by a mutex so the `len == cap` check and the push
//! happen atomically with respect to concurrent writers — the cap
//! (`MAX_SAMPLES`) must never be violated, even under contention.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Maximum number of latency samples retained. Samples beyond the cap are
/// dropped, not used to evict older samples.
pub const MAX_SAMPLES: usize = 10_000;

// ---------------------------------------------------------------------------
// MetricsAccumulator
// ---------------------------------------------------------------------------

/// Process-wide, concurrently-mutated metrics state.
///
/// One instance is shared (via `Arc`) across every request handler for the
/// lifetime of the process; it is never reset or swapped.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    invalid: AtomicU64,
    bad_executor: AtomicU64,
    latencies: Mutex<Vec<f64>>,
}

impl MetricsAccumulator {
    /// Create a fresh, zeroed accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation rejection (`requests.invalid`). Does not affect
    /// `requests.total` — invalid requests never reach dispatch.
    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unsupported-executor rejection (`requests.badexecutor`).
    pub fn record_bad_executor(&self) {
        self.bad_executor.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal outcome of a dispatched request.
    ///
    /// Always increments `requests.total`; increments exactly one of
    /// `requests.success` / `requests.failed`; increments `requests.retried`
    /// when `attempts > 1`. Always appends a latency sample (subject to the
    /// reservoir cap).
    pub fn record_dispatch(&self, success: bool, attempts: u32, latency_ms: f64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if attempts > 1 {
            self.retried.fetch_add(1, Ordering::Relaxed);
        }
        self.push_latency(latency_ms);
    }

    fn push_latency(&self, sample_ms: f64) {
        let mut guard = self.latencies.lock().expect("latency reservoir poisoned");
        if guard.len() < MAX_SAMPLES {
            guard.push(sample_ms);
        }
    }

    /// Take an instantaneous snapshot of all counters and latency percentiles.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self.latencies.lock().expect("latency reservoir poisoned");
        let mut sorted: Vec<f64> = latencies.clone();
        drop(latencies);
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };
        let p95 = percentile(&sorted, 95.0);

        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            bad_executor: self.bad_executor.load(Ordering::Relaxed),
            avg_latency_ms: avg,
            p95_latency_ms: p95,
        }
    }

    /// Number of latency samples currently retained (for tests/diagnostics).
    pub fn sample_count(&self) -> usize {
        self.latencies.lock().expect("latency reservoir poisoned").len()
    }
}

/// Linear-interpolation percentile over an already-sorted slice.
///
/// Returns `0.0` for an empty slice. `pct` is in `[0, 100]`.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Point-in-time view of [`MetricsAccumulator`], as served on `GET /metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total dispatched requests (`requests.total`).
    pub total: u64,
    /// Requests whose terminal outcome was success (`requests.success`).
    pub success: u64,
    /// Requests whose terminal outcome was failure (`requests.failed`).
    pub failed: u64,
    /// Requests that needed more than one attempt (`requests.retried`).
    pub retried: u64,
    /// Requests rejected by the validator (`requests.invalid`).
    pub invalid: u64,
    /// Requests rejected for an unsupported executor type (`requests.badexecutor`).
    pub bad_executor: u64,
    /// Mean latency across retained samples, in milliseconds.
    pub avg_latency_ms: f64,
    /// 95th-percentile latency across retained samples, in milliseconds.
    pub p95_latency_ms: f64,
}

// ---------------------------------------------------------------------------
// Structured logging span
// ---------------------------------------------------------------------------

/// A named bag of key-value attributes, emitted as a single structured log
/// line via `tracing`. Mirrors the per-request fields recorded
/// (`request_id`, `method`, `path`, `executor_type`, `status`, `duration_ms`).
#[derive(Debug, Clone, Default)]
pub struct TelemetrySpan {
    name: String,
    attributes: std::collections::BTreeMap<String, serde_json::Value>,
}

impl TelemetrySpan {
    /// Start a new span with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: std::collections::BTreeMap::new(),
        }
    }

    /// Attach an attribute, builder-style.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.attributes.insert(key.into(), v);
        }
        self
    }

    /// Emit the span as a single structured `tracing::info!` line.
    pub fn emit(&self) {
        let attrs = serde_json::to_string(&self.attributes).unwrap_or_default();
        tracing::info!(span = %self.name, attributes = %attrs, "telemetry span");
    }
}

// ---------------------------------------------------------------------------
// Exporters
// ---------------------------------------------------------------------------

/// A sink that turns a [`MetricsSnapshot`] into an external representation.
pub trait TelemetryExporter {
    /// Export the given snapshot.
    fn export(&self, snapshot: &MetricsSnapshot) -> serde_json::Value;
}

/// Exports a [`MetricsSnapshot`] as a plain JSON object, matching the
/// `/metrics` response body shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> serde_json::Value {
        serde_json::json!({
            "total": snapshot.total,
            "success": snapshot.success,
            "failed": snapshot.failed,
            "retried": snapshot.retried,
            "avg_latency_ms": snapshot.avg_latency_ms,
            "p95_latency_ms": snapshot.p95_latency_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
