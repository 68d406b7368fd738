//! Background recovery sweep.
//!
//! One sweep thread wakes every `interval`, reads up to `batch_size` pending
//! envelopes and hands them one by one to a fixed pool of `concurrency`
//! retry threads over a rendezvous channel. When every retry thread is busy
//! the hand-off blocks, so at most `concurrency` publish calls are ever in
//! flight no matter how large the backlog grows.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::config::RecoveryConfig;
use crate::cancel::CancelToken;
use crate::envelope::Envelope;
use crate::publisher::Publisher;
use crate::store::SequencedStore;

/// Result of one retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Published and marked committed.
    Committed,
    /// Publish failed; the envelope stays pending for a later sweep.
    PublishFailed,
    /// Published but the commit mark failed; a later sweep redelivers it.
    CommitFailed,
}

/// Publish `envelope` once and mark it committed on success.
///
/// Failures are logged and reported through the outcome, never propagated.
/// The commit step is not cancellable: once the broker accepted the event,
/// recording that is always attempted.
pub fn retry_envelope<S, P>(store: &S, publisher: &P, envelope: &Envelope) -> AttemptOutcome
where
    S: SequencedStore + ?Sized,
    P: Publisher + ?Sized,
{
    let seq = envelope.seq;
    if let Err(e) = publisher.publish(seq, &envelope.event) {
        warn!(seq, error = %e, "retry publish failed");
        return AttemptOutcome::PublishFailed;
    }
    if let Err(e) = store.mark_committed(seq, &CancelToken::none()) {
        warn!(seq, error = %e, "retry mark committed failed");
        return AttemptOutcome::CommitFailed;
    }
    info!(seq, "retry published and committed");
    AttemptOutcome::Committed
}

/// Statistics from the recovery worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Sweep ticks executed.
    pub sweeps: usize,
    /// Envelopes handed to a retry thread.
    pub dispatched: usize,
    /// Envelopes published and committed.
    pub published: usize,
    pub publish_failures: usize,
    pub commit_failures: usize,
    /// Sweeps that could not read the pending set.
    pub read_failures: usize,
    /// Hand-offs dropped because the worker was stopping.
    pub skipped: usize,
}

#[derive(Default)]
struct Counters {
    sweeps: AtomicUsize,
    dispatched: AtomicUsize,
    published: AtomicUsize,
    publish_failures: AtomicUsize,
    commit_failures: AtomicUsize,
    read_failures: AtomicUsize,
    skipped: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RecoveryStats {
        RecoveryStats {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

struct Shared<S, P> {
    store: S,
    publisher: P,
    config: RecoveryConfig,
    cancel: CancelToken,
    counters: Arc<Counters>,
    /// Sequences currently handed to a retry thread.
    in_flight: Mutex<HashSet<u64>>,
}

impl<S: SequencedStore, P: Publisher> Shared<S, P> {
    fn claim(&self, seq: u64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(seq)
    }

    fn release(&self, seq: u64) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&seq);
    }

    fn sweep(&self, queue: &SyncSender<Envelope>) {
        Counters::bump(&self.counters.sweeps);

        let pending = match self.store.read_pending(self.config.batch_size) {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "recovery sweep could not read pending envelopes");
                Counters::bump(&self.counters.read_failures);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "recovery sweep found pending envelopes");

        for envelope in pending {
            if self.cancel.is_cancelled() {
                break;
            }
            let seq = envelope.seq;
            if !self.claim(seq) {
                continue;
            }
            // Blocks while every retry thread is busy.
            if queue.send(envelope).is_err() {
                self.release(seq);
                break;
            }
            Counters::bump(&self.counters.dispatched);
        }
    }

    fn attempt(&self, envelope: Envelope) {
        let seq = envelope.seq;
        if self.cancel.is_cancelled() {
            debug!(seq, "recovery stopping, attempt skipped");
            Counters::bump(&self.counters.skipped);
        } else {
            // A panicking publisher counts as a failed publish; the retry
            // thread and the claim on `seq` must both survive it.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                retry_envelope(&self.store, &self.publisher, &envelope)
            }))
            .unwrap_or_else(|_| {
                error!(seq, "retry attempt panicked");
                AttemptOutcome::PublishFailed
            });
            let counter = match outcome {
                AttemptOutcome::Committed => &self.counters.published,
                AttemptOutcome::PublishFailed => &self.counters.publish_failures,
                AttemptOutcome::CommitFailed => &self.counters.commit_failures,
            };
            Counters::bump(counter);
        }
        self.release(seq);
    }
}

fn retry_loop<S: SequencedStore, P: Publisher>(
    shared: Arc<Shared<S, P>>,
    queue: Arc<Mutex<Receiver<Envelope>>>,
) {
    loop {
        let next = {
            let queue = queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.recv()
        };
        match next {
            Ok(envelope) => shared.attempt(envelope),
            // Sweep thread hung up: drain complete.
            Err(_) => break,
        }
    }
}

fn sweep_loop<S, P>(shared: Arc<Shared<S, P>>)
where
    S: SequencedStore + 'static,
    P: Publisher + 'static,
{
    let (tx, rx) = sync_channel::<Envelope>(0);
    let rx = Arc::new(Mutex::new(rx));

    let workers: Vec<JoinHandle<()>> = (0..shared.config.concurrency)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let rx = Arc::clone(&rx);
            thread::spawn(move || retry_loop(shared, rx))
        })
        .collect();
    drop(rx);

    let interval_ms = shared.config.interval.as_millis() as u64;
    info!(
        interval_ms,
        batch_size = shared.config.batch_size,
        concurrency = shared.config.concurrency,
        "recovery worker started"
    );

    while !shared.cancel.wait_timeout(shared.config.interval) {
        shared.sweep(&tx);
    }

    // Closing the queue lets idle retry threads exit; busy ones finish first.
    drop(tx);
    for worker in workers {
        if worker.join().is_err() {
            error!("retry thread panicked");
        }
    }

    info!("recovery worker stopped");
}

/// A running recovery sweep.
///
/// ## Example
///
/// ```ignore
/// use eventus::{DurableStore, LogPublisher, RecoveryConfig, RecoveryWorker};
/// use std::time::Duration;
///
/// let store = DurableStore::open("./data/outbox.redb")?;
/// let worker = RecoveryWorker::spawn(
///     store.clone(),
///     LogPublisher::new("orders"),
///     RecoveryConfig::default().with_interval(Duration::from_millis(200)),
/// );
///
/// // ... producers append events ...
///
/// // Stop the worker, wait for in-flight retries, and get stats
/// let stats = worker.stop();
/// println!("Recovered {} envelopes", stats.published);
/// ```
pub struct RecoveryWorker {
    cancel: CancelToken,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl RecoveryWorker {
    /// Start sweeping `store` in the background.
    pub fn spawn<S, P>(store: S, publisher: P, config: RecoveryConfig) -> Self
    where
        S: SequencedStore + 'static,
        P: Publisher + 'static,
    {
        Self::start(store, publisher, config, CancelToken::new())
    }

    /// Start a worker that also stops when `parent` is cancelled.
    ///
    /// Stopping the worker does not cancel `parent`.
    pub fn spawn_with_parent<S, P>(
        store: S,
        publisher: P,
        config: RecoveryConfig,
        parent: &CancelToken,
    ) -> Self
    where
        S: SequencedStore + 'static,
        P: Publisher + 'static,
    {
        Self::start(store, publisher, config, parent.child())
    }

    fn start<S, P>(store: S, publisher: P, config: RecoveryConfig, cancel: CancelToken) -> Self
    where
        S: SequencedStore + 'static,
        P: Publisher + 'static,
    {
        let counters = Arc::new(Counters::default());
        let shared = Arc::new(Shared {
            store,
            publisher,
            config: config.normalized(),
            cancel: cancel.clone(),
            counters: Arc::clone(&counters),
            in_flight: Mutex::new(HashSet::new()),
        });

        let handle = thread::spawn(move || sweep_loop(shared));

        Self {
            cancel,
            counters,
            handle: Some(handle),
        }
    }

    /// True until the sweep thread and every retry thread have exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Live statistics snapshot.
    pub fn stats(&self) -> RecoveryStats {
        self.counters.snapshot()
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Signal the worker to stop and wait for every in-flight attempt to finish.
    /// Returns the worker statistics.
    pub fn stop(mut self) -> RecoveryStats {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("recovery sweep thread panicked");
            }
        }
        self.counters.snapshot()
    }
}

impl Drop for RecoveryWorker {
    /// Signals stop without joining; in-flight attempts finish unobserved.
    /// Call [`RecoveryWorker::stop`] to wait for them.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
