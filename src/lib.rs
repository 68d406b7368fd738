//! Transactional outbox.
//!
//! Events are durably recorded in a sequenced log before they are handed to
//! a message broker, so a crash between "recorded" and "delivered" never
//! loses an event. Delivery is at-least-once:
//!
//! 1. [`OutboxWriter`] appends a pending envelope, publishes it, and marks it committed
//! 2. [`RecoveryWorker`] periodically re-drives whatever is still pending,
//!    with a bounded number of concurrent publish calls

mod cancel;
mod envelope;
mod event;
mod manager;
mod publisher;
pub mod recovery;
pub mod store;
mod writer;

pub use cancel::CancelToken;
pub use envelope::Envelope;
pub use event::Event;
pub use manager::OutboxManager;
pub use publisher::{from_fn, FnPublisher, LogPublisher, PublishError, Publisher};
pub use recovery::{retry_envelope, AttemptOutcome, RecoveryConfig, RecoveryStats, RecoveryWorker};
pub use store::{DurableStore, InMemoryStore, SequencedStore, StoreError, StoreResult, UNBOUNDED};
pub use writer::{OutboxWriter, WriteError};
