//! Background session maintenance
//!
//! Two tasks keep the session map honest:
//! - idle sessions are dropped after `session_idle_timeout`
//! - when the trusted key set is replaced, sessions of identities that are
//!   no longer trusted are dropped immediately

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rx_core::time::current_time_millis;

use crate::state::ServerState;

/// Interval between idle checks.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the idle session cleanup task.
pub async fn run_idle_cleanup(state: Arc<ServerState>, cancel: CancellationToken) {
    let idle_timeout = state.config.session_idle_timeout;
    let period = CLEANUP_INTERVAL.min(idle_timeout).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);

    tracing::info!(
        "Starting session cleanup task (idle timeout: {:?})",
        idle_timeout
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cleanup_idle_sessions(&state, idle_timeout);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Session cleanup task shutting down");
                break;
            }
        }
    }
}

/// Drop sessions unused for longer than `idle_timeout`.
pub fn cleanup_idle_sessions(state: &ServerState, idle_timeout: Duration) -> usize {
    let cutoff = current_time_millis().saturating_sub(idle_timeout.as_millis() as u64);
    let removed = state.sessions.remove_idle(cutoff);
    if removed > 0 {
        tracing::info!("Cleaned up {} idle sessions", removed);
    }
    removed
}

/// Revoke sessions whenever the trusted key set changes.
pub async fn run_trust_revocation(state: Arc<ServerState>, cancel: CancellationToken) {
    let mut updates = state.trust.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let trusted = Arc::clone(&updates.borrow_and_update());
                let removed = state.sessions.remove_untrusted(&trusted);
                if removed > 0 {
                    tracing::info!("Revoked {} sessions after trusted key reload", removed);
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }
    tracing::debug!("Trust revocation task stopped");
}
