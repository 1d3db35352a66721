//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::server::DEFAULT_PORT;

/// Configuration for the `rx` client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server
    pub server_url: String,

    /// Path to the client key pair (PKCS#8 PEM)
    pub key_path: PathBuf,

    /// Executor used when none is given on the command line
    pub executor: String,

    /// Expected server public key as hex. When set, handshakes with any
    /// other server key fail.
    pub server_public_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{}", DEFAULT_PORT),
            key_path: PathBuf::from("client.pem"),
            executor: "exec".to_string(),
            server_public_key: None,
        }
    }
}
