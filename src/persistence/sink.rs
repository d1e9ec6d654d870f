use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::Envelope;
use crate::utils::error::SinkError;

/// A message document as the store sees it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Envelope> for StoredMessage {
    fn from(envelope: Envelope) -> Self {
        Self {
            message: envelope.message,
            timestamp: envelope.timestamp,
        }
    }
}

/// Durable destination for consumed messages.
///
/// `store` must return `Err` for anything short of a durable write so the
/// consumer can requeue the delivery.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn store(&self, record: &StoredMessage) -> Result<(), SinkError>;

    /// Flushes and releases the store. Later `store` calls fail.
    async fn close(&self) -> Result<(), SinkError>;
}
