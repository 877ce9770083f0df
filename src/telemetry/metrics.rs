//! Metric instrument factories for workmesh.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an exporter configured these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workmesh instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workmesh")
}

/// Counter: workflow submissions.
/// Labels: `result` ("created" | "duplicate").
pub fn workflow_submitted() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.workflow.submitted")
        .with_description("Number of workflow submissions")
        .build()
}

/// Counter: workflow status transitions.
/// Labels: `from`, `to`.
pub fn workflow_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.workflow.state_transitions")
        .with_description("Number of workflow status transitions")
        .build()
}

/// Counter: workflows given an owner.
/// Labels: `local` (true when this peer is the owner).
pub fn workflow_assigned() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.workflow.assigned")
        .with_description("Number of workflows assigned")
        .build()
}

/// Counter: workflows left pending by an assignment pass.
pub fn workflow_deferred() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.workflow.deferred")
        .with_description("Number of workflows an assignment pass could not place")
        .build()
}

/// Counter: remote clock heads merged.
pub fn clock_merges() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.clock.merges")
        .with_description("Number of remote clock merges")
        .build()
}

/// Counter: state file loads at startup.
/// Labels: `result` ("ok" | "corrupt" | "fresh").
pub fn state_loads() -> Counter<u64> {
    meter()
        .u64_counter("workmesh.state.loads")
        .with_description("Number of state file loads")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workmesh.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
