//! Integration tests for the polling worker.

use std::sync::Arc;
use std::time::Duration;

use keyq::dispatcher::{Dispatcher, DispatcherHandle};
use keyq::error::{Error, Result};
use keyq::model::{Message, WorkerId};
use keyq::queue::DispatchQueue;
use keyq::worker::Worker;
use tokio::sync::{Mutex, watch};

const POLL: Duration = Duration::from_millis(2);

async fn wait_for_size(handle: &DispatcherHandle, size: usize) {
    for _ in 0..500 {
        if handle.size().await.unwrap() == size {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("queue never reached size {size}");
}

#[tokio::test]
async fn worker_handles_and_confirms_in_order() {
    let (handle, _dispatcher) = Dispatcher::spawn(DispatchQueue::new(), 16);
    for n in 0..5 {
        handle
            .enqueue(Message::new("A").id(n.to_string()))
            .await
            .unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = Worker::new(WorkerId(1), handle.clone(), POLL);

    let recorder = Arc::clone(&seen);
    let running = tokio::spawn(async move {
        worker
            .run(
                move |message: Message| {
                    let recorder = Arc::clone(&recorder);
                    async move {
                        recorder.lock().await.push(message.id.0);
                        Ok::<(), Error>(())
                    }
                },
                stop_rx,
            )
            .await
    });

    wait_for_size(&handle, 0).await;
    stop_tx.send(true).unwrap();
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.worker, WorkerId(1));
    assert_eq!(report.processed, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(*seen.lock().await, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn failed_message_stays_in_flight_and_keeps_the_lease() {
    let (handle, _dispatcher) = Dispatcher::spawn(DispatchQueue::new(), 16);
    // "good" is confirmed while "bad" is still buffered, so the lease holds;
    // "bad" then fails and is never confirmed.
    handle.enqueue(Message::new("A").id("good")).await.unwrap();
    handle.enqueue(Message::new("A").id("bad")).await.unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = Worker::new(WorkerId(1), handle.clone(), POLL);
    let running = tokio::spawn(async move {
        worker
            .run(
                |message: Message| async move {
                    if message.id.as_str() == "bad" {
                        return Err(Error::Other("boom".to_string()));
                    }
                    Ok::<(), Error>(())
                },
                stop_rx,
            )
            .await
    });

    for _ in 0..500 {
        let stats = handle.stats().await.unwrap();
        if stats.pending == 0 && stats.in_flight == 1 {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    stop_tx.send(true).unwrap();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);

    // The key is still leased to worker 1, so worker 2 gets nothing.
    handle.enqueue(Message::new("A").id("later")).await.unwrap();
    assert!(handle.dequeue(WorkerId(2)).await.unwrap().is_none());

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.owned_keys, 1);
}

#[tokio::test]
async fn dropped_shutdown_sender_stops_an_idle_worker() {
    let (handle, _dispatcher) = Dispatcher::spawn(DispatchQueue::new(), 4);
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = Worker::new(WorkerId(3), handle, Duration::from_secs(60));

    let running = tokio::spawn(async move {
        worker
            .run(|_message: Message| async { Ok::<(), Error>(()) }, stop_rx)
            .await
    });
    tokio::time::sleep(POLL).await;
    drop(stop_tx);

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(report.processed, 0);
    assert!(report.empty_polls >= 1);
}

#[tokio::test]
async fn worker_errors_when_dispatcher_is_gone() {
    let (handle, dispatcher) = Dispatcher::spawn(DispatchQueue::new(), 4);
    handle.shutdown();
    dispatcher.await.unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    let worker = Worker::new(WorkerId(1), handle, POLL);
    let result: Result<_> = worker
        .run(|_message: Message| async { Ok::<(), Error>(()) }, stop_rx)
        .await;
    assert!(matches!(result, Err(Error::Closed)));
}
