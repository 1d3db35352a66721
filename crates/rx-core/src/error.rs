//! Core error types for remexec

use std::path::PathBuf;
use thiserror::Error;

/// Key file and trust set errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// Key file could not be read or written
    #[error("Key file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key file exists but is not a valid key pair
    #[error("Failed to decode key pair from {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Key pair could not be encoded
    #[error("Failed to encode key pair: {0}")]
    Encode(String),

    /// A line of the trusted keys file is not a valid public key
    #[error("Invalid trusted key on line {line} of {path:?}: {reason}")]
    InvalidTrustedKey {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// File system watcher could not be set up
    #[error("Failed to watch {path:?}: {reason}")]
    Watch { path: PathBuf, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Archive transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Archive entry would land outside the base path
    #[error("Archive entry escapes base path: {0}")]
    TraversalRejected(PathBuf),

    /// Source of a download is missing or not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// I/O error while reading or writing the archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
