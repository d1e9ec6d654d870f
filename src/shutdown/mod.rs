//! Termination handling.
//!
//! A signal cancels the process-wide [`CancellationToken`](tokio_util::sync::CancellationToken);
//! the runtime then stops taking new work and hands the teardown to the
//! [`ShutdownCoordinator`], which releases resources in reverse order of
//! acquisition.

pub mod coordinator;
pub mod signals;

pub use coordinator::{ShutdownCoordinator, ShutdownReport};
pub use signals::{listen_for_signals, wait_for_shutdown_signal};
