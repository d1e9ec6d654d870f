use futures::future::BoxFuture;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// What happened during teardown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight tasks that finished inside the grace period.
    pub drained: usize,
    /// In-flight tasks aborted when the grace period ran out.
    pub abandoned: usize,
    pub completed: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0 && self.failed.is_empty()
    }
}

/// Runs teardown steps in registration order. Each step is best effort: a
/// failure is logged and recorded, and the next step still runs.
pub struct ShutdownCoordinator {
    grace: Duration,
    steps: Vec<(&'static str, BoxFuture<'static, Result<(), String>>)>,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            steps: Vec::new(),
        }
    }

    pub fn step<F, E>(mut self, name: &'static str, fut: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.steps
            .push((name, Box::pin(async move { fut.await.map_err(|e| e.to_string()) })));
        self
    }

    /// Waits for `in_flight` to finish, up to the grace period, then runs the
    /// steps.
    pub async fn run<T: 'static>(self, in_flight: &mut JoinSet<T>) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, grace = ?self.grace, "waiting for in-flight work");
        }
        let drain = async {
            while in_flight.join_next().await.is_some() {
                report.drained += 1;
            }
        };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            report.abandoned = in_flight.len();
            warn!(abandoned = report.abandoned, grace = ?self.grace, "grace period exceeded, aborting in-flight work");
            in_flight.abort_all();
        }

        for (name, step) in self.steps {
            match step.await {
                Ok(()) => {
                    info!(step = name, "shutdown step done");
                    report.completed.push(name);
                }
                Err(err) => {
                    warn!(step = name, error = %err, "shutdown step failed, continuing");
                    report.failed.push((name, err));
                }
            }
        }

        report
    }
}
