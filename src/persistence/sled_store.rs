//! Sink backed by `sled`.
//!
//! Documents live in the `messages` tree. Keys are the zero-padded, biased
//! millisecond timestamp plus a UUID, so iteration yields messages in
//! chronological order and equal timestamps never collide.

use async_trait::async_trait;
use sled::{Db, Tree};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::persistence::sink::{Sink, StoredMessage};
use crate::utils::error::SinkError;

pub const MESSAGES_TREE: &str = "messages";

#[derive(Clone)]
pub struct SledSink {
    db: Db,
    messages: Tree,
    closed: Arc<AtomicBool>,
}

impl SledSink {
    /// Open or create the database at `path`.
    pub fn open(path: &str) -> Result<Self, SinkError> {
        let db = sled::open(path).map_err(|e| SinkError::Storage(e.to_string()))?;
        let messages = db
            .open_tree(MESSAGES_TREE)
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        info!(path, stored = messages.len(), "message store opened");
        Ok(Self {
            db,
            messages,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// All stored documents, oldest first.
    pub fn load_all(&self) -> Result<Vec<StoredMessage>, SinkError> {
        self.messages
            .iter()
            .map(|entry| {
                let (_, value) = entry.map_err(|e| SinkError::Storage(e.to_string()))?;
                serde_json::from_slice(&value).map_err(|e| SinkError::Storage(e.to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl Sink for SledSink {
    async fn store(&self, record: &StoredMessage) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        if record.message.is_empty() {
            return Err(SinkError::Invalid("message is required".to_string()));
        }

        let serialized =
            serde_json::to_vec(record).map_err(|e| SinkError::Invalid(e.to_string()))?;
        let key = format!("{:020}_{}", sort_key(record), Uuid::new_v4());

        self.messages
            .insert(key.as_bytes(), serialized)
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        debug!(key = %key, "message stored");
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        self.db
            .flush_async()
            .await
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Milliseconds since the epoch shifted into `u64` so that byte order
/// matches time order, pre-1970 timestamps included.
fn sort_key(record: &StoredMessage) -> u64 {
    (record.timestamp.timestamp_millis() as u64) ^ (1 << 63)
}

impl std::fmt::Debug for SledSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledSink")
            .field("db", &"sled::Db")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
