use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Durable unit of the outbox log: an event plus its sequence and commit state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub created_at: SystemTime,
    /// Monotonic: once true it never goes back to false.
    pub committed: bool,
    pub event: Event,
}

impl Envelope {
    /// A freshly appended, not yet delivered envelope.
    pub fn pending(seq: u64, event: Event) -> Self {
        Self {
            seq,
            created_at: SystemTime::now(),
            committed: false,
            event,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.committed
    }

    /// Encode as the self-describing JSON record kept in the store.
    pub fn to_record(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a record previously produced by [`Envelope::to_record`].
    pub fn from_record(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
