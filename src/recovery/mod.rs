//! Recovery - re-drives pending envelopes until they are committed.
//!
//! - `RecoveryConfig` - sweep interval, batch size, concurrency budget
//! - `RecoveryWorker` - background sweep thread plus a fixed pool of retry workers
//! - `retry_envelope` - one publish + commit attempt for one envelope
//!
//! Pending envelopes are retried indefinitely: there is no attempt cap and
//! no dead-letter state. Every failed attempt is logged with its sequence.

mod config;
mod worker;

pub use config::{RecoveryConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_INTERVAL};
pub use worker::{retry_envelope, AttemptOutcome, RecoveryStats, RecoveryWorker};
