//! Dispatcher actor: runs one [`DispatchQueue`] on a dedicated task.
//!
//! The queue does no locking of its own. Callers talk to it through a
//! cloneable [`DispatcherHandle`], and the actor applies commands one at a
//! time, so no operation ever observes another half-done.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::model::{Message, MessageId, WorkerId};
use crate::queue::{DispatchQueue, QueueStats};
use crate::telemetry::metrics;

enum Command {
    Enqueue(Message),
    Dequeue {
        worker: WorkerId,
        reply: oneshot::Sender<Option<Message>>,
    },
    Confirm {
        worker: WorkerId,
        id: MessageId,
        reply: oneshot::Sender<bool>,
    },
    Size {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

/// Owns the queue and its mailbox. Constructed only through [`Dispatcher::spawn`].
pub struct Dispatcher {
    queue: DispatchQueue,
    mailbox: mpsc::Receiver<Command>,
    shutdown: Arc<Notify>,
}

/// Cheap, cloneable access to a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    mailbox: mpsc::Sender<Command>,
    shutdown: Arc<Notify>,
}

impl Dispatcher {
    /// Move `queue` onto a new task.
    ///
    /// The task ends when [`DispatcherHandle::shutdown`] is called or every
    /// handle is dropped, and yields the queue back so leftovers can be
    /// inspected.
    pub fn spawn(
        queue: DispatchQueue,
        mailbox_capacity: usize,
    ) -> (DispatcherHandle, JoinHandle<DispatchQueue>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let shutdown = Arc::new(Notify::new());

        let dispatcher = Self {
            queue,
            mailbox: rx,
            shutdown: Arc::clone(&shutdown),
        };
        let task = tokio::spawn(dispatcher.run());

        (
            DispatcherHandle {
                mailbox: tx,
                shutdown,
            },
            task,
        )
    }

    async fn run(mut self) -> DispatchQueue {
        info!("dispatcher started");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    None
                }
                command = self.mailbox.recv() => command,
            };
            let Some(command) = next else {
                break;
            };
            self.handle(command);
        }

        // Commands accepted before shutdown still get applied.
        self.mailbox.close();
        while let Ok(command) = self.mailbox.try_recv() {
            self.handle(command);
        }

        info!(remaining = self.queue.size(), "dispatcher stopped");
        self.queue
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(message) => {
                trace!(key = %message.key, id = %message.id, "enqueue");
                self.queue.enqueue(message);
                record_operation("enqueue", "ok");
            }
            Command::Dequeue { worker, reply } => {
                let had_lease = self.queue.owned_key(worker).is_some();
                let message = self.queue.dequeue(worker);

                let Some(message) = message else {
                    record_operation("dequeue", "empty");
                    let _ = reply.send(None);
                    return;
                };
                if !had_lease {
                    record_lease("acquired");
                }
                record_operation("dequeue", "ok");
                debug!(worker = %worker, key = %message.key, id = %message.id, "dispatched");

                if let Err(Some(message)) = reply.send(Some(message)) {
                    warn!(
                        worker = %worker,
                        id = %message.id,
                        "dequeue caller went away, message stays in flight"
                    );
                }
            }
            Command::Confirm { worker, id, reply } => {
                let had_lease = self.queue.owned_key(worker).is_some();
                let confirmed = self.queue.confirm(worker, &id);

                if confirmed {
                    record_operation("confirm", "ok");
                    if had_lease && self.queue.owned_key(worker).is_none() {
                        record_lease("released");
                    }
                } else {
                    record_operation("confirm", "ignored");
                    debug!(worker = %worker, id = %id, "confirm ignored, not in flight");
                }
                let _ = reply.send(confirmed);
            }
            Command::Size { reply } => {
                let size = self.queue.size();
                record_operation("size", "ok");
                metrics::queue_depth().record(size as u64, &[]);
                let _ = reply.send(size);
            }
            Command::Stats { reply } => {
                let stats = self.queue.stats();
                record_operation("stats", "ok");
                metrics::queue_depth().record((stats.pending + stats.in_flight) as u64, &[]);
                let _ = reply.send(stats);
            }
        }
    }
}

impl DispatcherHandle {
    /// Buffer a message. Waits only for mailbox space, never on the queue.
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        self.mailbox
            .send(Command::Enqueue(message))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Ask for the next message for `worker`; `None` means poll again later.
    pub async fn dequeue(&self, worker: WorkerId) -> Result<Option<Message>> {
        self.request(|reply| Command::Dequeue { worker, reply })
            .await
    }

    /// Acknowledge a message. `Ok(false)` means it was not in flight for
    /// `worker` (duplicate, late, or wrong worker) and nothing changed.
    pub async fn confirm(&self, worker: WorkerId, id: MessageId) -> Result<bool> {
        self.request(|reply| Command::Confirm { worker, id, reply })
            .await
    }

    /// Pending plus in-flight messages.
    pub async fn size(&self) -> Result<usize> {
        self.request(|reply| Command::Size { reply }).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Signal the dispatcher to stop. Commands already in the mailbox are
    /// still applied; later calls fail with [`Error::Closed`].
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .await
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)
    }
}

fn record_operation(operation: &'static str, result: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}

fn record_lease(transition: &'static str) {
    metrics::lease_transitions().add(1, &[KeyValue::new("transition", transition)]);
}
