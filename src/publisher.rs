//! Publish capability: hands one envelope's event to the message broker.
//!
//! The broker client owns connection management, I/O timeouts and protocol
//! details. A single `publish` call is one attempt; retrying is the
//! recovery worker's job.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::event::Event;

/// Error type for publish operations.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Serialization of the event failed
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// The broker rejected the event
    #[error("event rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("publish timeout")]
    Timeout,
    /// Other error
    #[error("publish error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Trait for publishing outbox events to a message broker.
///
/// Implementations might include:
/// - `LogPublisher` - For demos and tests
/// - `KafkaPublisher` - For Apache Kafka (key = sequence, value = event)
/// - `NatsPublisher` - For NATS
pub trait Publisher: Send + Sync {
    /// Publish the event stored under `seq`. One attempt, no internal retry.
    fn publish(&self, seq: u64, event: &Event) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, seq: u64, event: &Event) -> Result<(), PublishError> {
        (**self).publish(seq, event)
    }
}

/// Publisher backed by a plain function or closure. See [`from_fn`].
pub struct FnPublisher<F>(F);

/// Wrap a closure as a [`Publisher`].
pub fn from_fn<F>(f: F) -> FnPublisher<F>
where
    F: Fn(u64, &Event) -> Result<(), PublishError> + Send + Sync,
{
    FnPublisher(f)
}

impl<F> Publisher for FnPublisher<F>
where
    F: Fn(u64, &Event) -> Result<(), PublishError> + Send + Sync,
{
    fn publish(&self, seq: u64, event: &Event) -> Result<(), PublishError> {
        (self.0)(seq, event)
    }
}

/// A simple publisher that logs events through `tracing` or into a buffer.
pub struct LogPublisher {
    topic: String,
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl Default for LogPublisher {
    fn default() -> Self {
        Self::new("outbox")
    }
}

impl LogPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        LogPublisher {
            topic: topic.into(),
            buffer: None,
        }
    }

    pub fn with_buffer(topic: impl Into<String>, buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogPublisher {
            topic: topic.into(),
            buffer: Some(buffer),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Publisher for LogPublisher {
    fn publish(&self, seq: u64, event: &Event) -> Result<(), PublishError> {
        let payload = String::from_utf8_lossy(&event.payload);
        match &self.buffer {
            Some(buffer) => {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| PublishError::Rejected("log buffer poisoned".into()))?;
                buffer.push(format!(
                    "[{}] {} {} {}",
                    self.topic, seq, event.event_type, payload
                ));
            }
            None => {
                info!(
                    topic = %self.topic,
                    seq,
                    event_type = %event.event_type,
                    %payload,
                    "published"
                );
            }
        }
        Ok(())
    }
}
