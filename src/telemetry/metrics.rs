//! Metric instrument factories for keyq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one installed the instruments are no-ops.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("keyq")
}

/// Counter: queue operations processed by the dispatcher.
/// Labels: `operation` ("enqueue" | "dequeue" | "confirm" | "size" | "stats"),
/// `result` ("ok" | "empty" | "ignored").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("keyq.queue.operations")
        .with_description("Number of dispatch queue operations")
        .build()
}

/// Counter: key lease transitions.
/// Labels: `transition` ("acquired" | "released").
pub fn lease_transitions() -> Counter<u64> {
    meter()
        .u64_counter("keyq.queue.leases")
        .with_description("Number of key lease acquisitions and releases")
        .build()
}

/// Gauge: pending plus in-flight messages, sampled whenever depth is polled.
pub fn queue_depth() -> Gauge<u64> {
    meter()
        .u64_gauge("keyq.queue.depth")
        .with_description("Pending and in-flight messages")
        .build()
}

/// Histogram: handler duration per dispatched message.
/// Labels: `outcome` ("confirmed" | "failed").
pub fn dispatch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyq.dispatch.duration_ms")
        .with_description("Message handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
