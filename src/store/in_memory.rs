use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::error::{StoreError, StoreResult};
use super::{under_limit, SequencedStore};
use crate::cancel::CancelToken;
use crate::envelope::Envelope;
use crate::event::Event;

#[derive(Default)]
struct State {
    log: BTreeMap<u64, Envelope>,
    last_seq: u64,
}

/// Non-durable store with the same contract as [`DurableStore`](super::DurableStore).
///
/// Cloning creates another handle to the same storage (thread-safe via
/// `Arc<RwLock<...>>`). Contents are lost when the last handle is dropped.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan<F>(&self, from: u64, limit: usize, keep: F) -> StoreResult<Vec<Envelope>>
    where
        F: Fn(&Envelope) -> bool,
    {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        let mut out = Vec::new();
        for envelope in state.log.range(from..).map(|(_, e)| e) {
            if !under_limit(out.len(), limit) {
                break;
            }
            if keep(envelope) {
                out.push(envelope.clone());
            }
        }
        Ok(out)
    }
}

impl SequencedStore for InMemoryStore {
    fn append_pending(&self, event: &Event, cancel: &CancelToken) -> StoreResult<u64> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("append"))?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let seq = state
            .last_seq
            .checked_add(1)
            .ok_or_else(|| StoreError::Corrupt("sequence space exhausted".into()))?;
        state.log.insert(seq, Envelope::pending(seq, event.clone()));
        state.last_seq = seq;
        Ok(seq)
    }

    fn mark_committed(&self, seq: u64, cancel: &CancelToken) -> StoreResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let envelope = state.log.get_mut(&seq).ok_or(StoreError::NotFound(seq))?;
        envelope.committed = true;
        Ok(())
    }

    fn read_pending(&self, limit: usize) -> StoreResult<Vec<Envelope>> {
        self.scan(0, limit, Envelope::is_pending)
    }

    fn read_committed(&self, since: u64, limit: usize) -> StoreResult<Vec<Envelope>> {
        match since.checked_add(1) {
            Some(from) => self.scan(from, limit, |e| e.committed),
            None => Ok(Vec::new()),
        }
    }

    fn last_seq(&self) -> u64 {
        self.state.read().map(|s| s.last_seq).unwrap_or_else(|e| e.into_inner().last_seq)
    }
}
