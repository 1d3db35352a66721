//! CLI command implementations

mod exec;
mod keys;
mod kill;
mod transfer;

pub use exec::exec_command;
pub use keys::{keygen_command, pubkey_command};
pub use kill::kill_command;
pub use transfer::{download_command, upload_command};
