//! Connect-with-retry.
//!
//! [`Connector::establish`] opens a connection and a channel and declares
//! the role's topology, retrying transient failures on the configured
//! [`BackoffPolicy`]. Progress is published on a [`CircuitMonitor`] so health
//! checks can report it. A topology conflict ends the loop immediately.

use async_trait::async_trait;
use lapin::{Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::broker::backoff::BackoffPolicy;
use crate::broker::channel::MessageChannel;
use crate::broker::circuit::{CircuitMonitor, CircuitState};
use crate::broker::topology::{Declared, Role, TopologySpec, declare_topology};
use crate::config::Settings;
use crate::utils::error::BrokerError;

/// AMQP reply code for a normal close.
pub const REPLY_SUCCESS: u16 = 200;

/// A session the runtime keeps alive.
#[async_trait]
pub trait LinkSession: Send {
    type Channel: MessageChannel;

    fn channel(&self) -> Arc<Self::Channel>;

    /// Broker-assigned queue, consumer side only.
    fn queue(&self) -> Option<&str>;

    /// Resolves when the broker drops the connection or the channel.
    async fn lost(&mut self) -> String;
}

/// Establishes sessions for a role. [`Connector`] is the broker-backed one.
#[async_trait]
pub trait Link: Send + Sync {
    type Session: LinkSession;

    fn circuit(&self) -> &CircuitMonitor;

    async fn establish(&self, role: Role) -> Result<Self::Session, BrokerError>;
}

/// Sending half of a session's loss notification. Clones feed the same
/// [`LossSignal`].
#[derive(Debug, Clone)]
pub struct LossReporter {
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Debug)]
pub struct LossSignal {
    rx: mpsc::UnboundedReceiver<String>,
}

pub fn loss_signal() -> (LossReporter, LossSignal) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LossReporter { tx }, LossSignal { rx })
}

impl LossReporter {
    /// Handler for lapin's `on_error` hooks; the reason is prefixed with `source`.
    pub fn handler(&self, source: &'static str) -> impl FnMut(lapin::Error) + Send + 'static {
        let tx = self.tx.clone();
        move |err| {
            let _ = tx.send(format!("{source}: {err}"));
        }
    }
}

impl LossSignal {
    /// First reported reason. Also resolves once every reporter is gone.
    pub async fn recv(&mut self) -> String {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| "error handlers dropped".to_string())
    }
}

/// A live connection, its channel and the topology declared on it.
pub struct Session {
    pub connection: Connection,
    pub channel: Arc<Channel>,
    pub declared: Declared,
    lost: LossSignal,
}

#[async_trait]
impl LinkSession for Session {
    type Channel = Channel;

    fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    fn queue(&self) -> Option<&str> {
        self.declared.queue.as_deref()
    }

    async fn lost(&mut self) -> String {
        self.lost.recv().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel_id", &self.channel.id())
            .field("declared", &self.declared)
            .finish()
    }
}

pub struct Connector {
    url: String,
    topology: TopologySpec,
    backoff: BackoffPolicy,
    max_attempts: Option<u32>,
    circuit: CircuitMonitor,
    // serializes overlapping establish calls
    connecting: Mutex<()>,
}

impl Connector {
    pub fn new(settings: &Settings, circuit: CircuitMonitor) -> Self {
        Self {
            url: settings.rabbitmq.url.clone(),
            topology: TopologySpec::from(&settings.rabbitmq),
            backoff: settings.retry.backoff(),
            max_attempts: settings.retry.max_attempts,
            circuit,
            connecting: Mutex::new(()),
        }
    }

    pub fn circuit(&self) -> &CircuitMonitor {
        &self.circuit
    }

    /// Returns a session with the role's topology declared. Retries
    /// connection failures until success, a topology conflict, or the
    /// optional attempt cap.
    pub async fn establish(&self, role: Role) -> Result<Session, BrokerError> {
        let _guard = self.connecting.lock().await;
        info!(role = role.as_label(), "connecting to broker");
        retry_with_backoff(&self.backoff, self.max_attempts, &self.circuit, |_| {
            self.open(role)
        })
        .await
    }

    async fn open(&self, role: Role) -> Result<Session, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(format!("messager-{}", role.as_label()).into())
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(&self.url, properties)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let (reporter, lost) = loss_signal();
        connection.on_error(reporter.handler("connection"));

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel open failed").await;
                return Err(BrokerError::Connect(e.to_string()));
            }
        };

        // a broker-initiated channel close only reaches the channel's handler
        channel.on_error(reporter.handler("channel"));

        let declared = match declare_topology(&channel, role, &self.topology).await {
            Ok(declared) => declared,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "topology declaration failed").await;
                return Err(e);
            }
        };

        info!(role = role.as_label(), "connected to broker");
        Ok(Session {
            connection,
            channel: Arc::new(channel),
            declared,
            lost,
        })
    }
}

#[async_trait]
impl Link for Connector {
    type Session = Session;

    fn circuit(&self) -> &CircuitMonitor {
        Connector::circuit(self)
    }

    async fn establish(&self, role: Role) -> Result<Session, BrokerError> {
        Connector::establish(self, role).await
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` failures have accumulated. Waits `policy.next(n)` after the
/// n-th failure.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: Option<u32>,
    circuit: &CircuitMonitor,
    mut attempt: F,
) -> Result<T, BrokerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut failures: u32 = 0;
    loop {
        circuit.set(CircuitState::HalfOpen {
            attempt: failures + 1,
        });

        let err = match attempt(failures).await {
            Ok(value) => {
                circuit.set(CircuitState::Closed);
                if failures > 0 {
                    info!(failures, "broker reachable again");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        failures = failures.saturating_add(1);

        if !err.is_retryable() {
            error!(error = %err, label = err.as_label(), "fatal broker setup error");
            circuit.set(CircuitState::Open {
                failures,
                retry_in: Duration::ZERO,
            });
            return Err(err);
        }

        if max_attempts.is_some_and(|max| failures >= max) {
            error!(error = %err, failures, "giving up on broker");
            circuit.set(CircuitState::Open {
                failures,
                retry_in: Duration::ZERO,
            });
            return Err(BrokerError::Exhausted {
                attempts: failures,
                last: err.to_string(),
            });
        }

        let delay = policy.next(failures - 1);
        warn!(error = %err, failures, retry_in = ?delay, "broker connect failed, retrying");
        circuit.set(CircuitState::Open {
            failures,
            retry_in: delay,
        });
        tokio::time::sleep(delay).await;
    }
}
