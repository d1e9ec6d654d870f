//! Everything that touches the broker connection directly.
//!
//! - `connector`: connect-with-retry and the live [`Session`].
//! - `backoff` / `circuit`: the retry schedule and its observable state.
//! - `topology`: exchange/queue/binding declaration per role.
//! - `channel`: the channel seams used by the roles, and the shared slot.
//! - `message`: the [`Envelope`] wire type.

pub mod backoff;
pub mod channel;
pub mod circuit;
pub mod connector;
pub mod message;
pub mod topology;

pub use channel::{ChannelSlot, MessageChannel, TopologyChannel};
pub use circuit::{CircuitMonitor, CircuitState};
pub use connector::{Connector, Link, LinkSession, Session};
pub use message::Envelope;
pub use topology::{Role, TopologySpec};
