//! Outbox writer: append, publish, then mark committed.
//!
//! Each step fails differently:
//! 1. append fails - nothing persisted, the whole call may be retried
//! 2. publish fails - the envelope is durably pending; do not append again,
//!    the recovery worker redelivers it
//! 3. commit fails - delivered but not marked; the recovery worker
//!    redelivers (a duplicate, fine under at-least-once) and marks it

use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::publisher::{PublishError, Publisher};
use crate::store::{SequencedStore, StoreError};

/// Error type for [`OutboxWriter::append_and_publish`].
#[derive(Error, Debug)]
pub enum WriteError {
    /// The store write failed; no envelope exists and no sequence was used.
    #[error("append failed: {0}")]
    AppendFailed(#[source] StoreError),

    /// Stored as pending under `seq` but not delivered.
    #[error("publish failed for seq {seq}: {source}")]
    PublishFailed {
        seq: u64,
        #[source]
        source: PublishError,
    },

    /// Delivered but the commit mark for `seq` was not written.
    #[error("mark committed failed for seq {seq}: {source}")]
    CommitFailed {
        seq: u64,
        #[source]
        source: StoreError,
    },

    /// Cancelled before anything was persisted.
    #[error("append cancelled")]
    Cancelled,
}

impl WriteError {
    /// The allocated sequence, when the envelope was durably stored.
    pub fn seq(&self) -> Option<u64> {
        match self {
            WriteError::PublishFailed { seq, .. } | WriteError::CommitFailed { seq, .. } => {
                Some(*seq)
            }
            WriteError::AppendFailed(_) | WriteError::Cancelled => None,
        }
    }

    /// True when the event is durably stored and must not be appended again.
    pub fn is_stored(&self) -> bool {
        self.seq().is_some()
    }
}

/// Drives one event through append -> publish -> commit.
///
/// Holds no envelope state of its own; the store is the only source of truth.
pub struct OutboxWriter<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> OutboxWriter<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the publisher.
    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<S: SequencedStore, P: Publisher> OutboxWriter<S, P> {
    /// Append `event`, publish it, and mark it committed.
    ///
    /// On partial failure the error still carries the allocated sequence
    /// (see [`WriteError::seq`]).
    pub fn append_and_publish(&self, event: Event) -> Result<u64, WriteError> {
        self.append_and_publish_with(event, &CancelToken::none())
    }

    /// Like [`append_and_publish`](Self::append_and_publish), aborting the
    /// store transactions if `cancel` fires before they commit.
    pub fn append_and_publish_with(
        &self,
        event: Event,
        cancel: &CancelToken,
    ) -> Result<u64, WriteError> {
        let seq = self
            .store
            .append_pending(&event, cancel)
            .map_err(|err| match err {
                StoreError::Cancelled => WriteError::Cancelled,
                other => WriteError::AppendFailed(other),
            })?;

        if let Err(source) = self.publisher.publish(seq, &event) {
            warn!(seq, error = %source, "publish failed, envelope left pending");
            return Err(WriteError::PublishFailed { seq, source });
        }

        if let Err(source) = self.store.mark_committed(seq, cancel) {
            warn!(seq, error = %source, "mark committed failed after publish");
            return Err(WriteError::CommitFailed { seq, source });
        }

        debug!(seq, "published and committed");
        Ok(seq)
    }
}
