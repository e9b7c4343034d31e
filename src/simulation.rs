//! Run a scenario end to end against a live dispatcher and check the
//! delivery guarantees from the outside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{Message, MessageId, WorkerId};
use crate::queue::DispatchQueue;
use crate::scenario::{DEFAULT_TIMEOUT_MS, Scenario};
use crate::worker::{Worker, WorkerReport};

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub workers: usize,
    pub keys: usize,
    pub enqueued: usize,
    pub delivered: usize,
    /// Size of the queue when the dispatcher stopped.
    pub remaining: usize,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub per_worker: Vec<WorkerReport>,
    /// Keys whose messages were delivered out of enqueue order.
    pub fifo_violations: Vec<String>,
    /// Keys seen in two workers' handlers at the same time.
    pub overlap_violations: Vec<String>,
}

impl SimulationReport {
    /// Everything drained, in order, with no key shared.
    pub fn is_clean(&self) -> bool {
        !self.timed_out
            && self.remaining == 0
            && self.fifo_violations.is_empty()
            && self.overlap_violations.is_empty()
    }
}

#[derive(Default)]
struct Recorder {
    deliveries: HashMap<String, Vec<MessageId>>,
    active: HashMap<String, WorkerId>,
    overlaps: Vec<String>,
}

impl Recorder {
    fn begin(&mut self, worker: WorkerId, message: &Message) {
        if let Some(&other) = self.active.get(&message.key)
            && other != worker
        {
            self.overlaps.push(format!(
                "key {}: {} delivered to worker {worker} while worker {other} was processing",
                message.key, message.id
            ));
        }
        self.active.insert(message.key.clone(), worker);
        self.deliveries
            .entry(message.key.clone())
            .or_default()
            .push(message.id.clone());
    }

    fn finish(&mut self, worker: WorkerId, message: &Message) {
        if self.active.get(&message.key) == Some(&worker) {
            self.active.remove(&message.key);
        }
    }
}

/// Enqueue every scenario message, run the workers until the queue drains
/// (or the timeout passes), then stop everything and report.
pub async fn run(scenario: &Scenario, config: &Config) -> Result<SimulationReport> {
    scenario.validate()?;

    let worker_count = scenario.workers.unwrap_or(config.workers);
    let last_worker = u32::try_from(worker_count)
        .map_err(|_| Error::Scenario(format!("{worker_count} workers do not fit a worker id")))?;
    let poll_interval = scenario
        .poll_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.poll_interval);
    let processing_delay = Duration::from_millis(scenario.processing_delay_ms);
    let timeout = Duration::from_millis(scenario.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));

    let messages = scenario.messages();
    let enqueued = messages.len();
    let mut expected: HashMap<String, Vec<MessageId>> = HashMap::new();
    for message in &messages {
        expected
            .entry(message.key.clone())
            .or_default()
            .push(message.id.clone());
    }

    let started = Instant::now();
    let (handle, dispatcher) = Dispatcher::spawn(DispatchQueue::new(), config.mailbox_capacity);
    for message in messages {
        handle.enqueue(message).await?;
    }
    info!(
        enqueued,
        keys = expected.len(),
        workers = worker_count,
        "simulation started"
    );

    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut workers = JoinSet::new();

    for id in 1..=last_worker {
        let worker = Worker::new(id, handle.clone(), poll_interval);
        let worker_id = worker.id();
        let recorder = Arc::clone(&recorder);
        let stop = stop_rx.clone();

        workers.spawn(async move {
            let handler = move |message: Message| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.lock().await.begin(worker_id, &message);
                    if !processing_delay.is_zero() {
                        tokio::time::sleep(processing_delay).await;
                    }
                    recorder.lock().await.finish(worker_id, &message);
                    Ok::<(), Error>(())
                }
            };
            worker.run(handler, stop).await
        });
    }

    let deadline = started + timeout;
    let timed_out = loop {
        if handle.size().await? == 0 {
            break false;
        }
        if Instant::now() >= deadline {
            warn!(timeout_ms = timeout.as_millis() as u64, "simulation timed out");
            break true;
        }
        tokio::time::sleep(poll_interval).await;
    };

    let _ = stop_tx.send(true);
    let mut per_worker = Vec::with_capacity(worker_count);
    while let Some(joined) = workers.join_next().await {
        let report = joined.map_err(|e| Error::Other(format!("worker task failed: {e}")))??;
        per_worker.push(report);
    }
    per_worker.sort_by_key(|report| report.worker);

    handle.shutdown();
    let queue = dispatcher
        .await
        .map_err(|e| Error::Other(format!("dispatcher task failed: {e}")))?;

    let recorder = recorder.lock().await;
    let fifo_violations = fifo_violations(&expected, &recorder.deliveries);
    let report = SimulationReport {
        workers: worker_count,
        keys: expected.len(),
        enqueued,
        delivered: recorder.deliveries.values().map(Vec::len).sum(),
        remaining: queue.size(),
        timed_out,
        elapsed_ms: started.elapsed().as_millis() as u64,
        per_worker,
        fifo_violations,
        overlap_violations: recorder.overlaps.clone(),
    };

    info!(
        delivered = report.delivered,
        remaining = report.remaining,
        elapsed_ms = report.elapsed_ms,
        clean = report.is_clean(),
        "simulation finished"
    );
    Ok(report)
}

/// Each key's deliveries must be a prefix of its enqueue order.
fn fifo_violations(
    expected: &HashMap<String, Vec<MessageId>>,
    delivered: &HashMap<String, Vec<MessageId>>,
) -> Vec<String> {
    let mut violations = Vec::new();
    for (key, got) in delivered {
        let want = expected.get(key).map(Vec::as_slice).unwrap_or_default();
        let mismatch = got
            .iter()
            .enumerate()
            .find(|(i, id)| want.get(*i) != Some(*id));
        if let Some((i, id)) = mismatch {
            violations.push(format!(
                "key {key}: position {i} delivered {id}, expected {}",
                want.get(i).map_or("nothing".to_string(), ToString::to_string)
            ));
        }
    }
    violations.sort();
    violations
}
