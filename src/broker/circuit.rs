use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Health of the broker link as seen by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// A session is live.
    Closed,
    /// Last attempt failed; waiting `retry_in` before the next one.
    Open { failures: u32, retry_in: Duration },
    /// A connect attempt is in progress.
    HalfOpen { attempt: u32 },
}

impl CircuitState {
    pub fn as_label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitState::Closed)
    }
}

/// Shared, observable circuit state. Cloning yields another handle to the
/// same state.
#[derive(Debug, Clone)]
pub struct CircuitMonitor {
    tx: Arc<watch::Sender<CircuitState>>,
}

impl CircuitMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CircuitState::Open {
            failures: 0,
            retry_in: Duration::ZERO,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: CircuitState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> CircuitState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.tx.subscribe()
    }
}

impl Default for CircuitMonitor {
    fn default() -> Self {
        Self::new()
    }
}
