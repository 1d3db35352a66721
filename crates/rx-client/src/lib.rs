//! rx-client: Client library and command line tool for remexec
//!
//! [`RxClient`] performs the signed handshake and yields a [`Session`],
//! which runs remote commands, kills them and moves directories in both
//! directions as tar archives.

pub mod client;
pub mod commands;
pub mod error;
pub mod exec;
pub mod output;
pub mod session;

pub use client::RxClient;
pub use error::{ClientError, ClientResult};
pub use exec::{ExecOutcome, ExecResponse};
pub use session::Session;
