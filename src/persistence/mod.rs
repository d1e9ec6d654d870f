//! The `persistence` module is the sink side of the consumer: every
//! successfully consumed [`Envelope`](crate::broker::Envelope) is handed to a
//! [`Sink`], and only a successful `store` leads to an acknowledgement.
//!
//! [`SledSink`] is the bundled document store, backed by `sled`.

pub mod sink;
pub mod sled_store;

pub use sink::{Sink, StoredMessage};
pub use sled_store::SledSink;
