//! Sequenced durable store for outbox envelopes.
//!
//! The store exclusively owns envelope storage and the sequence counter.
//! Writers and the recovery worker only go through [`SequencedStore`].
//!
//! - `DurableStore` - redb-backed store, the production implementation
//! - `InMemoryStore` - non-durable store with the same contract

mod durable;
mod error;
mod in_memory;
pub(crate) mod keys;

pub use durable::DurableStore;
pub use error::{StoreError, StoreResult};
pub use in_memory::InMemoryStore;

use crate::cancel::CancelToken;
use crate::envelope::Envelope;
use crate::event::Event;

/// Read limit meaning "no limit".
pub const UNBOUNDED: usize = 0;

/// Append-only envelope log with a pending/committed flag per entry.
///
/// Implementations must be safe to call from many threads at once.
pub trait SequencedStore: Send + Sync {
    /// Allocate the next sequence and durably write a pending envelope.
    ///
    /// Allocation and write happen in one atomic transaction: concurrent
    /// callers get distinct, strictly increasing sequences, and a failed or
    /// cancelled call consumes no sequence and leaves nothing visible.
    fn append_pending(&self, event: &Event, cancel: &CancelToken) -> StoreResult<u64>;

    /// Mark `seq` committed. Already committed is a no-op; unknown is `NotFound`.
    fn mark_committed(&self, seq: u64, cancel: &CancelToken) -> StoreResult<()>;

    /// Up to `limit` pending envelopes in ascending sequence order.
    /// `limit == UNBOUNDED` returns all of them.
    fn read_pending(&self, limit: usize) -> StoreResult<Vec<Envelope>>;

    /// Up to `limit` committed envelopes with `seq > since`, ascending.
    fn read_committed(&self, since: u64, limit: usize) -> StoreResult<Vec<Envelope>>;

    /// Last allocated sequence (not necessarily committed); 0 when empty.
    fn last_seq(&self) -> u64;
}

impl<S: SequencedStore + ?Sized> SequencedStore for std::sync::Arc<S> {
    fn append_pending(&self, event: &Event, cancel: &CancelToken) -> StoreResult<u64> {
        (**self).append_pending(event, cancel)
    }

    fn mark_committed(&self, seq: u64, cancel: &CancelToken) -> StoreResult<()> {
        (**self).mark_committed(seq, cancel)
    }

    fn read_pending(&self, limit: usize) -> StoreResult<Vec<Envelope>> {
        (**self).read_pending(limit)
    }

    fn read_committed(&self, since: u64, limit: usize) -> StoreResult<Vec<Envelope>> {
        (**self).read_committed(since, limit)
    }

    fn last_seq(&self) -> u64 {
        (**self).last_seq()
    }
}

pub(crate) fn under_limit(len: usize, limit: usize) -> bool {
    limit == UNBOUNDED || len < limit
}
