//! Metric hooks for the runtime.
//!
//! With the `metrics` feature enabled, the runtime records OpenTelemetry
//! instruments once [`init_metric_handles`] has been called with a meter
//! (usually from the embedding binary's telemetry setup). Without the feature,
//! every hook compiles to a no-op.
//!
//! ## Instruments
//!
//! - `tasks_received` - task requests read from the stream.
//! - `unknown_tasks` - requests naming no registered handler.
//! - `executions_inflight` - executions currently running.
//! - `execution_failures` - handlers that failed or panicked.
//! - `reply_errors` - replies that could not be delivered.
//! - `execution_duration` - handler start to reply delivered, in ms.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static TASKS_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static UNKNOWN_TASKS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EXECUTIONS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EXECUTION_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REPLY_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EXECUTION_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: &Meter) {
    let _ = TASKS_RECEIVED.set(
        meter
            .u64_counter("tasks_received")
            .with_description("Task requests read from the stream")
            .build(),
    );

    let _ = UNKNOWN_TASKS.set(
        meter
            .u64_counter("unknown_tasks")
            .with_description("Task requests with no registered handler")
            .build(),
    );

    let _ = EXECUTIONS_INFLIGHT.set(
        meter
            .i64_up_down_counter("executions_inflight")
            .with_description("Concurrent task executions")
            .build(),
    );

    let _ = EXECUTION_FAILURES.set(
        meter
            .u64_counter("execution_failures")
            .with_description("Handlers that returned an error or panicked")
            .build(),
    );

    let _ = REPLY_ERRORS.set(
        meter
            .u64_counter("reply_errors")
            .with_description("Replies that could not be delivered")
            .build(),
    );

    let _ = EXECUTION_DURATION_MS.set(
        meter
            .f64_histogram("execution_duration")
            .with_unit("ms")
            .with_description("Handler start to reply delivered")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_tasks_received() {
    if let Some(counter) = TASKS_RECEIVED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_tasks_received() {}

#[cfg(feature = "metrics")]
pub fn increment_unknown_tasks() {
    if let Some(counter) = UNKNOWN_TASKS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_unknown_tasks() {}

#[cfg(feature = "metrics")]
pub fn increment_executions_inflight() {
    if let Some(counter) = EXECUTIONS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_executions_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_executions_inflight() {
    if let Some(counter) = EXECUTIONS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_executions_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_execution_failures() {
    if let Some(counter) = EXECUTION_FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_execution_failures() {}

#[cfg(feature = "metrics")]
pub fn increment_reply_errors() {
    if let Some(counter) = REPLY_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_reply_errors() {}

#[cfg(feature = "metrics")]
pub fn record_execution_duration(duration_ms: f64) {
    if let Some(histogram) = EXECUTION_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_execution_duration(_duration_ms: f64) {}
