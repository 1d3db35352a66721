//! Session management

mod cleanup;
mod manager;

pub use cleanup::{cleanup_idle_sessions, run_idle_cleanup, run_trust_revocation};
pub use manager::{Session, SessionManager};
