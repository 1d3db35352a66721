//! rx-server: Authenticated remote command execution over HTTP
//!
//! Clients holding a trusted Ed25519 key open a session at `/token`, then
//! run commands through named executors and stream their output back, kill
//! processes they started, and move directory trees as tar streams. The
//! trusted key set is reloaded from disk while the server runs.

pub mod auth;
pub mod executor;
pub mod lifecycle;
pub mod server;
pub mod session;
pub mod state;

pub use lifecycle::{ShutdownOutcome, GRACEFUL_TIMEOUT};
pub use server::{router, ApiError};
pub use state::ServerState;
