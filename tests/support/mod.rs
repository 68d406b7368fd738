//! Shared fixtures: temp stores and publisher test doubles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use eventus::{
    CancelToken, DurableStore, Envelope, Event, PublishError, Publisher, SequencedStore,
    StoreError, StoreResult,
};
use tempfile::TempDir;

/// A durable store in a fresh temp directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, DurableStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = DurableStore::open(dir.path().join("outbox.redb")).expect("open store");
    (dir, store)
}

pub fn demo_event(n: usize) -> Event {
    Event::with_string_payload("demo", format!(r#"{{"n":{}}}"#, n))
}

pub fn seqs(envelopes: &[Envelope]) -> Vec<u64> {
    envelopes.iter().map(|e| e.seq).collect()
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Publisher whose health can be flipped at runtime. Clones share state.
#[derive(Clone, Default)]
pub struct SwitchPublisher {
    down: Arc<AtomicBool>,
    delivered: Arc<Mutex<Vec<(u64, Event)>>>,
}

impl SwitchPublisher {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        let publisher = Self::default();
        publisher.set_down(true);
        publisher
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(u64, Event)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_seqs(&self) -> Vec<u64> {
        self.delivered().into_iter().map(|(seq, _)| seq).collect()
    }
}

impl Publisher for SwitchPublisher {
    fn publish(&self, seq: u64, event: &Event) -> Result<(), PublishError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PublishError::ConnectionFailed("broker down".into()));
        }
        self.delivered.lock().unwrap().push((seq, event.clone()));
        Ok(())
    }
}

/// Publisher that blocks every call until the gate is opened, tracking how
/// many calls are in flight at once.
#[derive(Clone, Default)]
pub struct GatedPublisher {
    gate: Arc<(Mutex<bool>, Condvar)>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl GatedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cond) = &*self.gate;
        *open.lock().unwrap() = true;
        cond.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Publisher for GatedPublisher {
    fn publish(&self, _seq: u64, _event: &Event) -> Result<(), PublishError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (open, cond) = &*self.gate;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cond.wait(guard).unwrap();
        }
        drop(guard);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store wrapper whose commit marks fail while `fail_commits` is set.
#[derive(Clone)]
pub struct FlakyCommitStore<S> {
    inner: S,
    fail_commits: Arc<AtomicBool>,
}

impl<S> FlakyCommitStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_commits: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl<S: SequencedStore> SequencedStore for FlakyCommitStore<S> {
    fn append_pending(&self, event: &Event, cancel: &CancelToken) -> StoreResult<u64> {
        self.inner.append_pending(event, cancel)
    }

    fn mark_committed(&self, seq: u64, cancel: &CancelToken) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected commit failure".into()));
        }
        self.inner.mark_committed(seq, cancel)
    }

    fn read_pending(&self, limit: usize) -> StoreResult<Vec<Envelope>> {
        self.inner.read_pending(limit)
    }

    fn read_committed(&self, since: u64, limit: usize) -> StoreResult<Vec<Envelope>> {
        self.inner.read_committed(since, limit)
    }

    fn last_seq(&self) -> u64 {
        self.inner.last_seq()
    }
}
