//! Connecting to a server

use std::time::Duration;

use rx_core::time::current_time_secs;
use rx_core::KeyPair;
use rx_protocol::{ClientHandshake, TokenResponse, VerifyingKey};

use crate::error::{check_status, ClientResult};
use crate::session::Session;

/// Connect timeout for the HTTP client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a single remexec server
pub struct RxClient {
    http: reqwest::Client,
    base_url: String,
    key_pair: KeyPair,
    server_key: Option<VerifyingKey>,
}

impl RxClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: impl Into<String>, key_pair: KeyPair) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_pair,
            server_key: None,
        })
    }

    /// Only accept handshakes signed by `key`
    pub fn with_server_key(mut self, key: VerifyingKey) -> Self {
        self.server_key = Some(key);
        self
    }

    /// Server base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server is up
    pub async fn health(&self) -> ClientResult<()> {
        let url = format!("{}/health", self.base_url);
        check_status(self.http.get(url).send().await?).await?;
        Ok(())
    }

    /// Perform the handshake and open a new session
    pub async fn open_session(&self) -> ClientResult<Session> {
        let handshake = ClientHandshake::new();
        let request = handshake.request(self.key_pair.signing_key(), current_time_secs());

        let url = format!("{}/token", self.base_url);
        tracing::debug!("Requesting session from {}", url);
        let response = check_status(self.http.post(url).json(&request).send().await?).await?;
        let response: TokenResponse = response.json().await?;

        let (id, token, server_key) = handshake.finish(&response, self.server_key.as_ref())?;
        tracing::debug!("Opened session {}", id);

        Ok(Session::new(
            self.http.clone(),
            self.base_url.clone(),
            id,
            token,
            server_key,
        ))
    }
}
