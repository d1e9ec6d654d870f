//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `messager` application.
//!
//! It centralizes the error taxonomy shared by the producer and consumer
//! processes and the logging bootstrap.

pub mod error;
pub mod logging;
