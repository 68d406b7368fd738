//! Recovery worker integration tests: bounded concurrency, end-to-end
//! redelivery, indefinite retry, and graceful shutdown.

#[path = "../support/mod.rs"]
mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use eventus::{
    from_fn, CancelToken, Event, OutboxManager, OutboxWriter, PublishError, RecoveryConfig,
    RecoveryWorker, SequencedStore, UNBOUNDED,
};

use support::{demo_event, seqs, temp_store, wait_until, GatedPublisher, SwitchPublisher};

const WAIT: Duration = Duration::from_secs(10);

fn fast(concurrency: usize) -> RecoveryConfig {
    RecoveryConfig::default()
        .with_interval(Duration::from_millis(20))
        .with_concurrency(concurrency)
}

fn append_pending<S: SequencedStore>(store: &S, count: usize) {
    for n in 0..count {
        store.append_pending(&demo_event(n), &CancelToken::none()).unwrap();
    }
}

// ============================================================================
// Concurrency bound
// ============================================================================

#[test]
fn in_flight_publishes_never_exceed_concurrency() {
    let (_dir, store) = temp_store();
    append_pending(&store, 20);
    let publisher = GatedPublisher::new();

    let worker = RecoveryWorker::spawn(store.clone(), publisher.clone(), fast(3));

    assert!(wait_until(WAIT, || publisher.in_flight() == 3));
    // Several more sweep ticks pass while every slot is blocked.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(publisher.in_flight(), 3);
    assert_eq!(publisher.max_in_flight(), 3);

    publisher.open();
    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    let stats = worker.stop();

    assert!(publisher.max_in_flight() <= 3);
    assert!(stats.published >= 20);
    assert_eq!(store.read_committed(0, UNBOUNDED).unwrap().len(), 20);
}

#[test]
fn single_slot_serializes_retries() {
    let (_dir, store) = temp_store();
    append_pending(&store, 5);
    let publisher = GatedPublisher::new();

    let worker = RecoveryWorker::spawn(store.clone(), publisher.clone(), fast(1));
    assert!(wait_until(WAIT, || publisher.in_flight() == 1));
    thread::sleep(Duration::from_millis(100));
    publisher.open();

    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    worker.stop();
    assert_eq!(publisher.max_in_flight(), 1);
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn failed_publish_is_recovered_within_one_interval() {
    let (_dir, store) = temp_store();
    let publisher = SwitchPublisher::broken();
    let writer = OutboxWriter::new(store.clone(), publisher.clone());
    let event_a = Event::with_string_payload("A", r#"{"n":1}"#);

    let err = writer.append_and_publish(event_a.clone()).unwrap_err();
    assert_eq!(err.seq(), Some(1));
    assert_eq!(seqs(&store.read_pending(UNBOUNDED).unwrap()), vec![1]);

    publisher.set_down(false);
    let interval = Duration::from_millis(200);
    let worker = RecoveryWorker::spawn(
        store.clone(),
        publisher.clone(),
        RecoveryConfig::default().with_interval(interval),
    );

    assert!(wait_until(interval * 5, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    let stats = worker.stop();

    let committed = store.read_committed(0, 10).unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].seq, 1);
    assert_eq!(committed[0].event, event_a);
    assert!(committed[0].committed);
    assert_eq!(stats.published, 1);
    assert_eq!(publisher.delivered_seqs(), vec![1]);
}

#[test]
fn backlog_larger_than_batch_drains_over_several_sweeps() {
    let (_dir, store) = temp_store();
    append_pending(&store, 250);
    let publisher = SwitchPublisher::healthy();

    let worker = RecoveryWorker::spawn(
        store.clone(),
        publisher.clone(),
        fast(4).with_batch_size(100),
    );

    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    let stats = worker.stop();

    let committed = seqs(&store.read_committed(0, UNBOUNDED).unwrap());
    assert_eq!(committed, (1..=250).collect::<Vec<u64>>());
    assert!(stats.sweeps >= 3, "250 envelopes at 100 per sweep needs 3 sweeps: {:?}", stats);
    assert!(stats.dispatched >= 250);
}

// ============================================================================
// Failure isolation and indefinite retry
// ============================================================================

#[test]
fn poison_envelope_does_not_block_the_batch() {
    let (_dir, store) = temp_store();
    append_pending(&store, 5);
    let rejects_first = from_fn(|seq, _| {
        if seq == 1 {
            Err(PublishError::Rejected("malformed".into()))
        } else {
            Ok(())
        }
    });

    let worker = RecoveryWorker::spawn(store.clone(), rejects_first, fast(2));

    assert!(wait_until(WAIT, || store.read_committed(0, UNBOUNDED).unwrap().len() == 4));
    assert!(wait_until(WAIT, || worker.stats().publish_failures >= 3));
    let stats = worker.stop();

    assert_eq!(seqs(&store.read_pending(UNBOUNDED).unwrap()), vec![1]);
    assert_eq!(seqs(&store.read_committed(0, UNBOUNDED).unwrap()), vec![2, 3, 4, 5]);
    assert!(stats.publish_failures >= 3);
}

#[test]
fn panicking_publish_is_retried_on_a_later_sweep() {
    let (_dir, store) = temp_store();
    append_pending(&store, 3);
    let panicked = AtomicBool::new(false);
    let panics_once = from_fn(move |seq, _| {
        if seq == 1 && !panicked.swap(true, Ordering::SeqCst) {
            panic!("publisher bug on seq {}", seq);
        }
        Ok(())
    });

    let worker = RecoveryWorker::spawn(store.clone(), panics_once, fast(2));

    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    let stats = worker.stop();

    assert_eq!(seqs(&store.read_committed(0, UNBOUNDED).unwrap()), vec![1, 2, 3]);
    assert!(stats.publish_failures >= 1);
    assert!(stats.published >= 3);
}

#[test]
fn panics_do_not_shrink_the_retry_pool() {
    let (_dir, store) = temp_store();
    append_pending(&store, 5);
    let panics_low = from_fn(|seq, _| {
        if seq <= 2 {
            panic!("publisher bug on seq {}", seq);
        }
        Ok(())
    });

    let worker = RecoveryWorker::spawn(store.clone(), panics_low, fast(2));

    assert!(wait_until(WAIT, || {
        seqs(&store.read_committed(0, UNBOUNDED).unwrap()) == vec![3, 4, 5]
    }));
    // Both poisoned envelopes keep getting redispatched.
    assert!(wait_until(WAIT, || worker.stats().publish_failures >= 6));
    assert!(worker.is_running());
    worker.stop();

    assert_eq!(seqs(&store.read_pending(UNBOUNDED).unwrap()), vec![1, 2]);
}

#[test]
fn broker_outage_is_retried_until_it_recovers() {
    let (_dir, store) = temp_store();
    append_pending(&store, 3);
    let publisher = SwitchPublisher::broken();

    let worker = RecoveryWorker::spawn(store.clone(), publisher.clone(), fast(2));
    assert!(wait_until(WAIT, || worker.stats().publish_failures >= 6));
    assert_eq!(store.read_pending(UNBOUNDED).unwrap().len(), 3);

    publisher.set_down(false);
    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    worker.stop();
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn stop_waits_for_in_flight_attempts() {
    let (_dir, store) = temp_store();
    append_pending(&store, 2);
    let publisher = GatedPublisher::new();

    let worker = RecoveryWorker::spawn(store.clone(), publisher.clone(), fast(2));
    assert!(wait_until(WAIT, || publisher.in_flight() == 2));

    let opener = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            publisher.open();
        })
    };
    let stats = worker.stop();

    // Both attempts ran to completion, commits included, before stop returned.
    assert_eq!(publisher.completed(), 2);
    assert_eq!(publisher.in_flight(), 0);
    assert!(store.read_pending(UNBOUNDED).unwrap().is_empty());
    assert_eq!(stats.published, 2);
    opener.join().unwrap();
}

#[test]
fn stopped_worker_makes_no_more_attempts() {
    let (_dir, store) = temp_store();
    let publisher = SwitchPublisher::healthy();

    let worker = RecoveryWorker::spawn(store.clone(), publisher.clone(), fast(2));
    worker.stop();

    append_pending(&store, 2);
    thread::sleep(Duration::from_millis(100));
    assert!(publisher.delivered().is_empty());
    assert_eq!(store.read_pending(UNBOUNDED).unwrap().len(), 2);
}

#[test]
fn parent_cancellation_stops_the_worker() {
    let (_dir, store) = temp_store();
    let parent = CancelToken::new();

    let worker = RecoveryWorker::spawn_with_parent(
        store.clone(),
        SwitchPublisher::healthy(),
        fast(2),
        &parent,
    );
    assert!(worker.is_running());

    parent.cancel();
    assert!(wait_until(WAIT, || !worker.is_running()));
    worker.stop();
}

#[test]
fn stopping_the_worker_leaves_parent_alone() {
    let (_dir, store) = temp_store();
    let parent = CancelToken::new();

    let worker = RecoveryWorker::spawn_with_parent(
        store.clone(),
        SwitchPublisher::healthy(),
        fast(2),
        &parent,
    );
    worker.stop();

    assert!(!parent.is_cancelled());
}

// ============================================================================
// Manager facade
// ============================================================================

#[test]
fn manager_recovers_what_the_writer_could_not_deliver() {
    let (_dir, store) = temp_store();
    let publisher = SwitchPublisher::broken();
    let mut outbox = OutboxManager::new(store.clone(), publisher.clone());

    for n in 0..3 {
        let err = outbox.publish_and_commit(demo_event(n)).unwrap_err();
        assert!(err.is_stored());
    }
    assert!(outbox.start_retry(fast(2)));
    assert!(!outbox.start_retry(fast(2)));
    assert!(outbox.is_retrying());

    publisher.set_down(false);
    assert!(wait_until(WAIT, || store.read_pending(UNBOUNDED).unwrap().is_empty()));
    let stats = outbox.stop_retry().expect("worker was running");

    assert!(stats.published >= 3);
    assert!(outbox.stop_retry().is_none());
    assert_eq!(seqs(&store.read_committed(0, UNBOUNDED).unwrap()), vec![1, 2, 3]);

    let seq = outbox.publish_and_commit(demo_event(3)).unwrap();
    assert_eq!(seq, 4);
}

#[test]
fn dropping_the_manager_waits_for_in_flight_retries() {
    let (_dir, store) = temp_store();
    append_pending(&store, 1);
    let publisher = GatedPublisher::new();
    let mut outbox = OutboxManager::new(store.clone(), publisher.clone());

    assert!(outbox.start_retry(fast(1)));
    assert!(wait_until(WAIT, || publisher.in_flight() == 1));

    let opener = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            publisher.open();
        })
    };
    drop(outbox);

    assert_eq!(publisher.completed(), 1);
    assert!(store.read_pending(UNBOUNDED).unwrap().is_empty());
    opener.join().unwrap();
}
