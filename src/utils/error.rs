//! Error types shared by the publishing and consuming sides.
//!
//! - [`BrokerError`]: connection, channel and topology failures.
//! - [`PublishError`]: outcome of a producer-side publish request.
//! - [`ProcessingError`]: why a delivered message could not be stored.
//! - [`SinkError`]: failures reported by the document store.
//!
//! Only [`BrokerError::TopologyConflict`] is fatal; everything else is
//! resolved locally by retrying, refusing the request, or requeueing.

use std::time::Duration;
use thiserror::Error;

/// Failures talking to the broker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Could not open a connection or channel.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A declaration clashed with an existing entity of the same name.
    /// Needs an operator; never retried.
    #[error("topology conflict on {entity}: {reason}")]
    TopologyConflict { entity: String, reason: String },

    /// An operation on an open channel failed.
    #[error("channel operation failed: {0}")]
    Channel(String),

    /// The broker negatively confirmed a publish.
    #[error("publish was not confirmed by the broker")]
    Rejected,

    /// The channel or connection is already closed.
    #[error("channel closed")]
    Closed,

    /// Retry budget configured through `retry.max_attempts` ran out.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Connect(_) => "connect_failure",
            BrokerError::TopologyConflict { .. } => "topology_conflict",
            BrokerError::Channel(_) => "channel_failure",
            BrokerError::Rejected => "publish_rejected",
            BrokerError::Closed => "channel_closed",
            BrokerError::Exhausted { .. } => "retry_exhausted",
        }
    }

    /// Whether re-establishing the session may cure the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Connect(_) | BrokerError::Channel(_) | BrokerError::Closed
        )
    }
}

/// Caller-side validation failure; never reaches the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is required")]
    MissingMessage,
}

/// Result of a refused or failed publish.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No open channel. The request is refused, not buffered.
    #[error("broker connection not available")]
    Unavailable,

    /// Publisher confirm came back negative.
    #[error("broker rejected the message")]
    Rejected,

    #[error("publish failed: {0}")]
    Internal(String),
}

impl PublishError {
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Validation(_) => "validation_error",
            PublishError::Unavailable => "unavailable",
            PublishError::Rejected => "rejected",
            PublishError::Internal(_) => "internal",
        }
    }
}

impl From<BrokerError> for PublishError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected => PublishError::Rejected,
            BrokerError::Closed => PublishError::Unavailable,
            other => PublishError::Internal(other.to_string()),
        }
    }
}

/// Failures reported by a [`Sink`](crate::persistence::Sink).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Record violates the store's schema.
    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("sink is closed")]
    Closed,
}

/// Why a delivery ended up negatively acknowledged.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("malformed payload: {0}")]
    Deserialization(String),

    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("sink did not answer within {0:?}")]
    SinkTimeout(Duration),
}

impl ProcessingError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessingError::Deserialization(_) => "deserialization_failure",
            ProcessingError::Sink(_) => "sink_failure",
            ProcessingError::SinkTimeout(_) => "sink_timeout",
        }
    }

    /// Malformed payloads will fail the same way on every redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessingError::Deserialization(_))
    }
}
