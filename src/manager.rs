use std::sync::Arc;

use tracing::warn;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::publisher::Publisher;
use crate::recovery::{RecoveryConfig, RecoveryStats, RecoveryWorker};
use crate::store::SequencedStore;
use crate::writer::{OutboxWriter, WriteError};

/// One store, one publisher, the writer in front of them and an optional
/// recovery worker behind them.
///
/// Dropping the manager stops the recovery worker and waits for its
/// in-flight retries, the same as [`OutboxManager::stop_retry`].
///
/// ## Example
///
/// ```ignore
/// use eventus::{DurableStore, Event, LogPublisher, OutboxManager, RecoveryConfig};
///
/// let store = DurableStore::open("./data/outbox.redb")?;
/// let mut outbox = OutboxManager::new(store, LogPublisher::new("orders"));
/// outbox.start_retry(RecoveryConfig::default());
///
/// match outbox.publish_and_commit(Event::with_string_payload("OrderPlaced", "{}")) {
///     Ok(seq) => println!("published seq={}", seq),
///     Err(e) => println!("publish failed: {}", e),
/// }
///
/// outbox.stop_retry();
/// ```
pub struct OutboxManager<S, P> {
    writer: OutboxWriter<S, Arc<P>>,
    retry: Option<RecoveryWorker>,
}

impl<S, P> OutboxManager<S, P>
where
    S: SequencedStore + Clone + 'static,
    P: Publisher + 'static,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            writer: OutboxWriter::new(store, Arc::new(publisher)),
            retry: None,
        }
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    pub fn writer(&self) -> &OutboxWriter<S, Arc<P>> {
        &self.writer
    }

    /// Append, publish and commit one event. See [`OutboxWriter::append_and_publish`].
    pub fn publish_and_commit(&self, event: Event) -> Result<u64, WriteError> {
        self.writer.append_and_publish(event)
    }

    pub fn publish_and_commit_with(
        &self,
        event: Event,
        cancel: &CancelToken,
    ) -> Result<u64, WriteError> {
        self.writer.append_and_publish_with(event, cancel)
    }

    /// Start the background recovery worker. Returns false if one is already running.
    pub fn start_retry(&mut self, config: RecoveryConfig) -> bool {
        self.spawn_retry(config, None)
    }

    /// Start the recovery worker as a child of `parent`.
    pub fn start_retry_with_parent(
        &mut self,
        config: RecoveryConfig,
        parent: &CancelToken,
    ) -> bool {
        self.spawn_retry(config, Some(parent))
    }

    fn spawn_retry(&mut self, config: RecoveryConfig, parent: Option<&CancelToken>) -> bool {
        if self.retry.as_ref().is_some_and(RecoveryWorker::is_running) {
            warn!("recovery worker already running");
            return false;
        }
        // A worker that stopped on parent cancellation is replaced.
        if let Some(stale) = self.retry.take() {
            stale.stop();
        }

        let store = self.writer.store().clone();
        let publisher = Arc::clone(self.writer.publisher());
        self.retry = Some(match parent {
            Some(parent) => RecoveryWorker::spawn_with_parent(store, publisher, config, parent),
            None => RecoveryWorker::spawn(store, publisher, config),
        });
        true
    }

    pub fn is_retrying(&self) -> bool {
        self.retry.as_ref().is_some_and(RecoveryWorker::is_running)
    }

    /// Stop the recovery worker, waiting for in-flight retries.
    pub fn stop_retry(&mut self) -> Option<RecoveryStats> {
        self.retry.take().map(RecoveryWorker::stop)
    }
}

impl<S, P> Drop for OutboxManager<S, P> {
    fn drop(&mut self) {
        if let Some(worker) = self.retry.take() {
            worker.stop();
        }
    }
}
