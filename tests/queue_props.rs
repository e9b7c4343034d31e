//! Randomized invariant checks over arbitrary operation sequences.

use std::collections::{HashMap, HashSet};

use keyq::model::{Message, MessageId, WorkerId};
use keyq::queue::DispatchQueue;
use proptest::prelude::*;

const WORKERS: [WorkerId; 3] = [WorkerId(1), WorkerId(2), WorkerId(3)];

#[derive(Debug, Clone)]
enum Op {
    Enqueue(u8),
    Dequeue(usize),
    /// Worker index, then an index into every id enqueued so far.
    Confirm(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..4).prop_map(Op::Enqueue),
        3 => (0usize..WORKERS.len()).prop_map(Op::Dequeue),
        2 => (0usize..WORKERS.len(), any::<usize>()).prop_map(|(w, n)| Op::Confirm(w, n)),
    ]
}

/// What the queue should look like from the outside.
#[derive(Default)]
struct Model {
    ids: Vec<MessageId>,
    enqueued_by_key: HashMap<String, Vec<MessageId>>,
    delivered_by_key: HashMap<String, Vec<MessageId>>,
    in_flight: HashMap<WorkerId, HashSet<MessageId>>,
    enqueued: usize,
    confirmed: usize,
}

fn apply(queue: &mut DispatchQueue, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match *op {
        Op::Enqueue(k) => {
            let key = format!("k{k}");
            let id = MessageId::from(format!("m{}", model.ids.len()));
            model.ids.push(id.clone());
            model
                .enqueued_by_key
                .entry(key.clone())
                .or_default()
                .push(id.clone());
            model.enqueued += 1;
            queue.enqueue(Message::new(key).id(id));
        }
        Op::Dequeue(w) => {
            let worker = WORKERS[w];
            if let Some(message) = queue.dequeue(worker) {
                // Sticky or freshly claimed, the message comes from the
                // worker's own key.
                prop_assert_eq!(queue.owned_key(worker), Some(message.key.as_str()));

                model
                    .delivered_by_key
                    .entry(message.key.clone())
                    .or_default()
                    .push(message.id.clone());
                model
                    .in_flight
                    .entry(worker)
                    .or_default()
                    .insert(message.id);
            }
        }
        Op::Confirm(w, n) => {
            let worker = WORKERS[w];
            let id = if model.ids.is_empty() {
                MessageId::from("missing")
            } else {
                model.ids[n % model.ids.len()].clone()
            };
            let expected = model
                .in_flight
                .get_mut(&worker)
                .is_some_and(|ids| ids.remove(&id));
            prop_assert_eq!(queue.confirm(worker, &id), expected);
            if expected {
                model.confirmed += 1;
            }
        }
    }
    Ok(())
}

fn check_invariants(queue: &DispatchQueue, model: &Model) -> Result<(), TestCaseError> {
    prop_assert_eq!(queue.size(), model.enqueued - model.confirmed);

    for (key, delivered) in &model.delivered_by_key {
        let enqueued = &model.enqueued_by_key[key];
        prop_assert!(
            enqueued.starts_with(delivered),
            "key {} delivered {:?} out of order (enqueued {:?})",
            key,
            delivered,
            enqueued
        );
    }

    // At most one owner per key, and that owner holds exactly this key.
    let mut owners = HashSet::new();
    for key in model.enqueued_by_key.keys() {
        if let Some(owner) = queue.owner_of(key) {
            prop_assert_eq!(queue.owned_key(owner), Some(key.as_str()));
            prop_assert!(owners.insert(owner), "worker {} owns two keys", owner);
        }
    }
    prop_assert_eq!(queue.stats().owned_keys, owners.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn invariants_hold_for_any_operation_sequence(ops in prop::collection::vec(op(), 0..200)) {
        let mut queue = DispatchQueue::new();
        let mut model = Model::default();

        for op in &ops {
            apply(&mut queue, &mut model, op)?;
            check_invariants(&queue, &model)?;
        }
    }

    #[test]
    fn every_message_drains_once_workers_confirm(ops in prop::collection::vec(op(), 0..200)) {
        let mut queue = DispatchQueue::new();
        let mut model = Model::default();
        for op in &ops {
            apply(&mut queue, &mut model, op)?;
        }

        // Finish whatever is in flight, then keep every worker busy until
        // no one makes progress.
        for worker in WORKERS {
            let ids: Vec<MessageId> = queue.in_flight_for(worker).map(|m| m.id.clone()).collect();
            for id in ids {
                prop_assert!(queue.confirm(worker, &id));
            }
        }
        loop {
            let mut progressed = false;
            for worker in WORKERS {
                if let Some(message) = queue.dequeue(worker) {
                    prop_assert!(queue.confirm(worker, &message.id));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        prop_assert_eq!(queue.size(), 0);
        prop_assert_eq!(queue.stats().owned_keys, 0);
    }
}
