//! # Messager
//!
//! `messager` is the reliability layer between a producer and a consumer that
//! talk through a RabbitMQ fanout exchange. The producer accepts messages over
//! HTTP and publishes them as persistent JSON envelopes; the consumer stores
//! every delivery in a sink and only acknowledges what was stored.
//!
//! ## Core Modules
//!
//! - `broker`: connection with retry, circuit state, topology declaration and the envelope wire format.
//! - `client`: the publisher and consumer roles.
//! - `config`: layered settings (file, `.env`, environment).
//! - `persistence`: the sink contract and the bundled `sled` store.
//! - `runtime`: the `producer` and `consumer` processes.
//! - `shutdown`: signal handling and ordered teardown.
//! - `transport`: the producer's HTTP surface.
//! - `utils`: error types and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod runtime;
pub mod shutdown;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    mod integration_test;
}
