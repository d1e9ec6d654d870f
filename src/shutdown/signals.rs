//! OS signal handling.
//!
//! On Unix, SIGINT, SIGTERM and SIGQUIT all count as a termination request;
//! elsewhere only Ctrl-C.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancels `token` on the first termination signal.
pub fn listen_for_signals(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(err) = result {
                    warn!(error = %err, "could not install signal handlers");
                    return;
                }
                info!("shutting down gracefully");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}
