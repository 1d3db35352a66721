//! Server lifecycle: start, wait for a stop signal, drain, stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::server;
use crate::session::{run_idle_cleanup, run_trust_revocation};
use crate::state::ServerState;

/// Default time allowed for in-flight requests to finish after a stop signal
pub const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// How the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight requests finished within the timeout
    Graceful,
    /// The timeout expired with requests still running
    Forced,
}

impl ShutdownOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced => 1,
        }
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Drive `server` until `cancel` fires, then give it `timeout` to drain.
///
/// A server that stops on its own counts as graceful.
pub async fn drive<F>(server: F, cancel: CancellationToken, timeout: Duration) -> ShutdownOutcome
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!("Server stopped with error: {}", e);
            }
            return ShutdownOutcome::Graceful;
        }
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Draining in-flight requests (timeout {:?})", timeout);
    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!("Server stopped with error: {}", e);
            }
            ShutdownOutcome::Graceful
        }
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!("Graceful shutdown timed out after {:?}", timeout);
            ShutdownOutcome::Forced
        }
    }
}

/// Run the server on `listener` until `cancel` fires.
///
/// Background session tasks run alongside. On a forced stop every tracked
/// process is killed.
pub async fn run(
    state: Arc<ServerState>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> ShutdownOutcome {
    let timeout = state.config.graceful_timeout;

    let cleanup = tokio::spawn(run_idle_cleanup(Arc::clone(&state), cancel.clone()));
    let revocation = tokio::spawn(run_trust_revocation(Arc::clone(&state), cancel.clone()));

    let server = server::serve(listener, Arc::clone(&state), cancel.clone());
    let outcome = drive(server, cancel.clone(), timeout).await;

    // Stop background tasks even if the server stopped on its own
    cancel.cancel();
    let _ = cleanup.await;
    let _ = revocation.await;

    if outcome == ShutdownOutcome::Forced {
        let killed = state.processes.kill_all();
        if killed > 0 {
            tracing::warn!("Killed {} running processes", killed);
        }
    }

    tracing::info!("Server stopped ({:?})", outcome);
    outcome
}
