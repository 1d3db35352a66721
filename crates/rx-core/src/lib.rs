//! rx-core: Key management, configuration and file transfer for remexec
//!
//! This crate provides the pieces shared by the server and the client:
//! identity key files, the trusted key set and its hot reload, TOML
//! configuration, and tar packing and unpacking with path containment.

pub mod config;
pub mod error;
pub mod keys;
pub mod time;
pub mod transfer;
pub mod trust;
pub mod watcher;

pub use error::{ConfigError, KeyError, TransferError};
pub use keys::{fingerprint, generate_key_pair, load_key_pair, public_key_hex_from_file, KeyPair};
pub use trust::{load_trusted_keys, TrustStore, TrustedKey, TrustedKeySet};
pub use watcher::{reload_now, watch_trusted_keys, TrustWatcher};
