//! Key-affinity dispatch queue.
//!
//! Messages are buffered per key and handed out so that one key is leased to
//! at most one worker, and one worker holds at most one key. A worker keeps
//! receiving its key's messages (the sticky path) until it confirms one of
//! them while the key's buffer is empty; the key may then move to another
//! worker.
//!
//! Release looks only at the buffer. A worker that dequeues several messages
//! before confirming loses its lease on the first confirm after the buffer
//! drains, even with later messages of that key still unconfirmed.
//!
//! The queue does no locking. Hosts that need concurrent access serialize it
//! behind [`crate::dispatcher::Dispatcher`].

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, trace};

use crate::model::{Message, MessageId, WorkerId};

/// Point-in-time counts for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    /// Buffered, not yet dispatched.
    pub pending: usize,
    /// Dispatched, not yet confirmed.
    pub in_flight: usize,
    /// Keys ever seen. Buckets are never dropped.
    pub keys: usize,
    pub owned_keys: usize,
    /// Workers with at least one unconfirmed message.
    pub busy_workers: usize,
}

/// Keys that may be claimable, in first-insertion order.
///
/// Membership is only a hint: acquisition re-checks each candidate against
/// the buckets and the ownership map, and drops every candidate it visits.
#[derive(Debug, Default)]
struct Candidates {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl Candidates {
    /// Re-inserting a present key keeps its original position.
    fn insert(&mut self, key: &str) {
        if self.members.insert(key.to_string()) {
            self.order.push_back(key.to_string());
        }
    }

    fn pop_front(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        self.members.remove(&key);
        Some(key)
    }
}

/// The dispatch queue. Owns all state and enforces all invariants.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    /// Per-key FIFO buffers of pending messages.
    buckets: HashMap<String, VecDeque<Message>>,
    candidates: Candidates,
    key_owner: HashMap<String, WorkerId>,
    worker_key: HashMap<WorkerId, String>,
    /// Per worker: message id -> message given out but not yet confirmed.
    in_flight: HashMap<WorkerId, HashMap<MessageId, Message>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a message behind every earlier message with the same key.
    ///
    /// Never blocks and never checks ownership; an owned key marked as a
    /// candidate here is filtered out at acquisition time.
    pub fn enqueue(&mut self, message: Message) {
        self.candidates.insert(&message.key);
        self.buckets
            .entry(message.key.clone())
            .or_default()
            .push_back(message);
    }

    /// Hand the next message to `worker`, or `None` if nothing is eligible.
    ///
    /// A worker that owns a key only ever receives that key's messages. A
    /// worker without a key claims the first candidate that still has
    /// pending messages and no owner.
    pub fn dequeue(&mut self, worker: WorkerId) -> Option<Message> {
        if let Some(key) = self.worker_key.get(&worker) {
            // An empty bucket keeps the lease: release only happens on confirm.
            let message = self.buckets.get_mut(key)?.pop_front()?;
            self.track_in_flight(worker, &message);
            return Some(message);
        }

        let key = self.claim_candidate()?;
        let message = self.buckets.get_mut(&key)?.pop_front()?;

        debug!(worker = %worker, key = %key, "lease acquired");
        self.key_owner.insert(key.clone(), worker);
        self.worker_key.insert(worker, key);

        self.track_in_flight(worker, &message);
        Some(message)
    }

    /// Acknowledge a message previously handed to `worker`.
    ///
    /// Returns `false` without touching anything when the worker never
    /// received `id` or has already confirmed it. If the key's buffer is
    /// empty, the key's lease is released.
    pub fn confirm(&mut self, worker: WorkerId, id: &MessageId) -> bool {
        let Some(records) = self.in_flight.get_mut(&worker) else {
            return false;
        };
        let Some(message) = records.remove(id) else {
            return false;
        };
        if records.is_empty() {
            self.in_flight.remove(&worker);
        }

        let key = message.key;
        if self.buckets.get(&key).is_none_or(VecDeque::is_empty) {
            self.release(worker, &key);
        }

        true
    }

    /// Pending plus in-flight messages.
    pub fn size(&self) -> usize {
        self.pending_len() + self.in_flight_len()
    }

    pub fn pending_len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The worker currently leasing `key`.
    pub fn owner_of(&self, key: &str) -> Option<WorkerId> {
        self.key_owner.get(key).copied()
    }

    /// The key currently leased by `worker`.
    pub fn owned_key(&self, worker: WorkerId) -> Option<&str> {
        self.worker_key.get(&worker).map(String::as_str)
    }

    /// Messages given to `worker` and not yet confirmed, in no particular order.
    pub fn in_flight_for(&self, worker: WorkerId) -> impl Iterator<Item = &Message> + '_ {
        self.in_flight
            .get(&worker)
            .into_iter()
            .flat_map(|records| records.values())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending_len(),
            in_flight: self.in_flight_len(),
            keys: self.buckets.len(),
            owned_keys: self.key_owner.len(),
            busy_workers: self.in_flight.len(),
        }
    }

    /// Pop candidates until one is claimable. Visited candidates are dropped
    /// whether or not they qualify.
    fn claim_candidate(&mut self) -> Option<String> {
        while let Some(key) = self.candidates.pop_front() {
            let pending = self.buckets.get(&key).is_some_and(|b| !b.is_empty());
            if pending && !self.key_owner.contains_key(&key) {
                return Some(key);
            }
            trace!(key = %key, "stale candidate dropped");
        }
        None
    }

    fn track_in_flight(&mut self, worker: WorkerId, message: &Message) {
        self.in_flight
            .entry(worker)
            .or_default()
            .insert(message.id.clone(), message.clone());
    }

    /// Clears the key's owner, whoever it is, and the worker's own lease on
    /// the key if it still holds one.
    fn release(&mut self, worker: WorkerId, key: &str) {
        let owner = self.key_owner.remove(key);
        if self.worker_key.get(&worker).is_some_and(|owned| owned == key) {
            self.worker_key.remove(&worker);
        }
        if let Some(owner) = owner {
            debug!(worker = %worker, owner = %owner, key, "lease released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_keep_first_insertion_order() {
        let mut candidates = Candidates::default();
        candidates.insert("b");
        candidates.insert("a");
        candidates.insert("b");

        assert_eq!(candidates.pop_front().as_deref(), Some("b"));
        assert_eq!(candidates.pop_front().as_deref(), Some("a"));
        assert_eq!(candidates.pop_front(), None);
    }

    #[test]
    fn popped_candidate_can_be_reinserted() {
        let mut candidates = Candidates::default();
        candidates.insert("a");
        candidates.insert("b");
        assert_eq!(candidates.pop_front().as_deref(), Some("a"));

        candidates.insert("a");
        assert_eq!(candidates.pop_front().as_deref(), Some("b"));
        assert_eq!(candidates.pop_front().as_deref(), Some("a"));
    }
}
