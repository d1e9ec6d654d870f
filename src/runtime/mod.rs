//! Process wiring: one entry point per role.
//!
//! Both entry points install signal handlers on a fresh
//! [`CancellationToken`](tokio_util::sync::CancellationToken), keep the broker
//! link alive through the [`Connector`](crate::broker::Connector), and hand
//! teardown to the [`ShutdownCoordinator`](crate::shutdown::ShutdownCoordinator).

pub mod consumer;
pub mod producer;

pub use consumer::run_consumer;
pub use producer::run_producer;

pub type RunResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

use crate::shutdown::ShutdownReport;
use tracing::{info, warn};

fn log_report(report: &ShutdownReport) {
    if report.is_clean() {
        info!(drained = report.drained, steps = ?report.completed, "shutdown complete");
    } else {
        warn!(
            drained = report.drained,
            abandoned = report.abandoned,
            failed = ?report.failed,
            "shutdown finished with errors"
        );
    }
}
