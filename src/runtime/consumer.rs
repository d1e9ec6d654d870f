use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::circuit::{CircuitMonitor, CircuitState};
use crate::broker::connector::{Connector, Link, LinkSession, REPLY_SUCCESS};
use crate::broker::Role;
use crate::client::{Consumer, Disposition};
use crate::client::consumer::{DeliveryPolicy, DeliverySource, StreamEnd};
use crate::config::Settings;
use crate::persistence::{Sink, SledSink};
use crate::runtime::{RunResult, log_report};
use crate::shutdown::{ShutdownCoordinator, listen_for_signals};
use crate::utils::error::BrokerError;

/// Runs the consumer until a termination signal or a fatal broker error.
pub async fn run_consumer(settings: Settings) -> RunResult {
    let shutdown = CancellationToken::new();
    listen_for_signals(shutdown.clone());

    let sink = Arc::new(SledSink::open(&settings.sink.path)?);
    info!(path = %settings.sink.path, stored = sink.len(), "sink opened");

    let connector = Connector::new(&settings, CircuitMonitor::new());
    let consumer = Consumer::new(sink.clone(), DeliveryPolicy::from(&settings.consumer));
    let mut in_flight = JoinSet::new();

    let (session, fatal) =
        match consume_until_shutdown(&connector, &consumer, &shutdown, &mut in_flight).await {
            Ok(session) => (session, None),
            Err(err) => (None, Some(err)),
        };

    let mut coordinator = ShutdownCoordinator::new(settings.shutdown.grace());
    if let Some(session) = session {
        let channel = session.channel.clone();
        let connection = session.connection;
        coordinator = coordinator
            .step("close channel", async move {
                channel.close(REPLY_SUCCESS, "consumer shutdown").await
            })
            .step("close connection", async move {
                connection.close(REPLY_SUCCESS, "consumer shutdown").await
            });
    }
    let closing = sink.clone();
    coordinator = coordinator.step("close sink", async move { closing.close().await });

    log_report(&coordinator.run(&mut in_flight).await);

    match fatal {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Consumes across reconnects. Returns the live session once shutdown is
/// requested, `None` if shutdown arrived while connecting.
pub(crate) async fn consume_until_shutdown<L>(
    link: &L,
    consumer: &Consumer,
    shutdown: &CancellationToken,
    in_flight: &mut JoinSet<Disposition>,
) -> Result<Option<L::Session>, BrokerError>
where
    L: Link,
    L::Session: DeliverySource,
{
    loop {
        let established = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            result = link.establish(Role::Consumer) => result,
        };
        let mut session = match established {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "broker link unrecoverable, stopping consumer");
                return Err(err);
            }
        };
        let queue = session.queue().unwrap_or_default().to_string();

        match session.deliver_to(consumer, shutdown, in_flight).await {
            Ok(StreamEnd::Shutdown) => return Ok(Some(session)),
            Ok(StreamEnd::Lost(reason)) => {
                warn!(%reason, %queue, "delivery stream lost, reconnecting");
            }
            Err(err) if err.is_retryable() => {
                warn!(error = %err, %queue, "consume failed, reconnecting");
            }
            Err(err) => return Err(err),
        }
        link.circuit().set(CircuitState::Open {
            failures: 0,
            retry_in: Duration::ZERO,
        });
    }
}
