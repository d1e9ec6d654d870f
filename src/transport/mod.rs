//! The `transport` module is the producer-facing HTTP surface.
//!
//! It validates the request body, hands the message to the
//! [`Publisher`](crate::client::Publisher) and maps the outcome onto a
//! status code. It also serves a health endpoint that reports the broker
//! link.

pub mod http;
pub mod message;

pub use http::{AppState, router};
