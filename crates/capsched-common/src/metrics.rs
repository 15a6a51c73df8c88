//! Metrics registry for capacity scheduling
//!
//! Provides OpenTelemetry metrics for:
//! - Reconciliation outcomes (applied, skipped, failed) per pool and schedule
//! - Reconciliation duration
//! - Control plane call latency by operation
//! - Last requested desired capacity per pool

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for capsched metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("capsched"));

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Counter of reconciliations by outcome
///
/// Labels:
/// - `pool`: namespace/name of the pool
/// - `schedule`: up, down
/// - `outcome`: applied, skipped_already_matched, skipped_busy, failed
pub static RECONCILIATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capsched_reconciliations_total")
        .with_description("Total number of capacity reconciliations by outcome")
        .with_unit("{reconciliations}")
        .build()
});

/// Histogram of reconciliation duration
///
/// Labels:
/// - `pool`: namespace/name of the pool
/// - `outcome`: applied, skipped_already_matched, skipped_busy, failed
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("capsched_reconcile_duration_seconds")
        .with_description("Duration of capacity reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Gauge of the desired capacity last requested for a pool
///
/// Labels:
/// - `pool`: namespace/name of the pool
pub static REQUESTED_DESIRED: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("capsched_requested_desired_size")
        .with_description("Desired size requested by the last applied reconciliation")
        .with_unit("{nodes}")
        .build()
});

// ============================================================================
// Control Plane Call Metrics
// ============================================================================

/// Histogram of control plane call duration
///
/// Labels:
/// - `operation`: discover, get, update
/// - `result`: ok, error (discovery), or the error kind label
///   (pool_not_found, transient, rejected, serialization)
pub static CONTROL_PLANE_CALL_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("capsched_control_plane_call_duration_seconds")
        .with_description("Duration of control plane API calls in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Times one reconciliation from start to the emitted outcome
pub struct ReconcileTimer {
    pool: String,
    start: Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            start: Instant::now(),
        }
    }

    /// Record the duration under the given outcome label
    pub fn finish(self, outcome: &str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("pool", self.pool),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }
}

/// Times one control plane call
pub struct CallTimer {
    operation: &'static str,
    start: Instant,
}

impl CallTimer {
    /// Start timing a call
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Record the call with its result label
    pub fn finish(self, result: &str) {
        CONTROL_PLANE_CALL_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("operation", self.operation),
                KeyValue::new("result", result.to_string()),
            ],
        );
    }
}

/// Count one reconciliation outcome
pub fn record_reconciliation(pool: &str, schedule: &str, outcome: &str) {
    RECONCILIATIONS.add(
        1,
        &[
            KeyValue::new("pool", pool.to_string()),
            KeyValue::new("schedule", schedule.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ],
    );
}

/// Update the requested-desired gauge for a pool
pub fn set_requested_desired(pool: &str, desired: u32) {
    REQUESTED_DESIRED.record(
        u64::from(desired),
        &[KeyValue::new("pool", pool.to_string())],
    );
}
