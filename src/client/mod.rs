//! The `client` module holds the two broker clients built on top of the
//! connector: the [`Publisher`] used by the producer process and the
//! [`Consumer`] used by the consumer process.

pub mod consumer;
pub mod publisher;

pub use consumer::{Consumer, DeliveryPolicy, Disposition, Settle};
pub use publisher::Publisher;
