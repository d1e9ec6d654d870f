use lapin::Channel;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::circuit::{CircuitMonitor, CircuitState};
use crate::broker::connector::{Connector, Link, LinkSession, REPLY_SUCCESS};
use crate::broker::{ChannelSlot, Role};
use crate::client::Publisher;
use crate::config::Settings;
use crate::runtime::{RunResult, log_report};
use crate::shutdown::{ShutdownCoordinator, listen_for_signals};
use crate::transport::{AppState, router};
use crate::utils::error::BrokerError;

/// Runs the HTTP producer until a termination signal or a fatal broker error.
pub async fn run_producer(settings: Settings) -> RunResult {
    let shutdown = CancellationToken::new();
    listen_for_signals(shutdown.clone());

    let circuit = CircuitMonitor::new();
    let connector = Arc::new(Connector::new(&settings, circuit.clone()));
    let slot: ChannelSlot<Channel> = ChannelSlot::empty();
    let publisher = Publisher::new(
        slot.clone(),
        settings.rabbitmq.exchange.clone(),
        settings.rabbitmq.confirms,
    );

    let link = tokio::spawn(keep_link(connector, slot, shutdown.clone()));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            shutdown.cancel();
            return Err(err.into());
        }
    };
    info!(%addr, "producer listening");

    let app = router(AppState { publisher, circuit });
    let stop = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await;
    shutdown.cancel();
    if let Err(err) = &served {
        error!(error = %err, "http server failed");
    }

    let session = link.await??;

    let mut coordinator = ShutdownCoordinator::new(settings.shutdown.grace());
    if let Some(session) = session {
        let channel = session.channel.clone();
        let connection = session.connection;
        coordinator = coordinator
            .step("close channel", async move {
                channel.close(REPLY_SUCCESS, "producer shutdown").await
            })
            .step("close connection", async move {
                connection.close(REPLY_SUCCESS, "producer shutdown").await
            });
    }
    log_report(&coordinator.run(&mut JoinSet::<()>::new()).await);

    served?;
    Ok(())
}

/// Keeps a publisher channel installed in `slot`, reconnecting after loss.
/// Returns the live session on shutdown, or the error that made the link
/// unrecoverable (after cancelling `shutdown`).
pub(crate) async fn keep_link<L: Link>(
    link: Arc<L>,
    slot: ChannelSlot<<L::Session as LinkSession>::Channel>,
    shutdown: CancellationToken,
) -> Result<Option<L::Session>, BrokerError> {
    loop {
        let established = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            result = link.establish(Role::Publisher) => result,
        };
        let mut session = match established {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "broker link unrecoverable, stopping producer");
                shutdown.cancel();
                return Err(err);
            }
        };
        slot.install(session.channel());

        let lost = tokio::select! {
            _ = shutdown.cancelled() => None,
            reason = session.lost() => Some(reason),
        };
        slot.clear();

        match lost {
            None => return Ok(Some(session)),
            Some(reason) => {
                warn!(%reason, "broker connection lost, reconnecting");
                link.circuit().set(CircuitState::Open {
                    failures: 0,
                    retry_in: Duration::ZERO,
                });
            }
        }
    }
}
