//! Dispatch span helpers.
//!
//! One span per message handed to a worker, covering the handler run and
//! the confirm that follows it.

use tracing::Span;

use crate::model::{Message, WorkerId};

/// Start a span for processing `message` on `worker`.
///
/// The `dispatch.outcome` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_dispatch_span(worker: WorkerId, message: &Message) -> Span {
    tracing::info_span!(
        "dispatch.process",
        "dispatch.worker" = %worker,
        "dispatch.message_id" = %message.id,
        "dispatch.key" = %message.key,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

/// Record how processing ended ("confirmed" or "failed").
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("dispatch.outcome", outcome);
}
