//! Polling worker: pull a message, run the handler, confirm.
//!
//! A worker is a consumer, not a supervisor. When its handler fails the
//! message is left unconfirmed and stays in flight, since the queue has no
//! redelivery. The key stays leased to this worker until it confirms a later
//! message of the key with the buffer empty.

use std::future::Future;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, info, warn};

use crate::dispatcher::DispatcherHandle;
use crate::error::Result;
use crate::model::{Message, WorkerId};
use crate::telemetry::dispatch::{record_outcome, start_dispatch_span};
use crate::telemetry::metrics;

/// What a worker did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: WorkerId,
    /// Handled and confirmed.
    pub processed: u64,
    /// Handler returned an error; left in flight.
    pub failed: u64,
    pub empty_polls: u64,
}

pub struct Worker {
    id: WorkerId,
    handle: DispatcherHandle,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(id: impl Into<WorkerId>, handle: DispatcherHandle, poll_interval: Duration) -> Self {
        Self {
            id: id.into(),
            handle,
            poll_interval,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is observed between messages; a handler that is running
    /// finishes and is confirmed first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Closed`] if the dispatcher goes away
    /// while the worker is still polling.
    pub async fn run<H, Fut>(
        &self,
        mut handler: H,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerReport>
    where
        H: FnMut(Message) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut report = WorkerReport {
            worker: self.id,
            processed: 0,
            failed: 0,
            empty_polls: 0,
        };
        info!(worker = %self.id, "worker started");

        while !*shutdown.borrow() {
            let Some(message) = self.handle.dequeue(self.id).await? else {
                report.empty_polls += 1;
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            };

            if self.process(&mut handler, message).await? {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            worker = %self.id,
            processed = report.processed,
            failed = report.failed,
            "worker stopped"
        );
        Ok(report)
    }

    /// Run the handler for one message. Returns whether it was confirmed.
    async fn process<H, Fut>(&self, handler: &mut H, message: Message) -> Result<bool>
    where
        H: FnMut(Message) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let span = start_dispatch_span(self.id, &message);
        let id = message.id.clone();
        let start = Instant::now();

        let outcome = handler(message).instrument(span.clone()).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(()) => {
                record_outcome(&span, "confirmed");
                metrics::dispatch_duration_ms()
                    .record(duration_ms, &[KeyValue::new("outcome", "confirmed")]);
                if !self.handle.confirm(self.id, id.clone()).await? {
                    span.in_scope(|| warn!(worker = %self.id, id = %id, "confirm ignored"));
                }
                Ok(true)
            }
            Err(e) => {
                record_outcome(&span, "failed");
                metrics::dispatch_duration_ms()
                    .record(duration_ms, &[KeyValue::new("outcome", "failed")]);
                span.in_scope(|| {
                    warn!(
                        worker = %self.id,
                        id = %id,
                        error = %e,
                        "handler failed, message left in flight"
                    )
                });
                Ok(false)
            }
        }
    }
}
