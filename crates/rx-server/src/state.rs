//! Shared server state

use std::sync::Arc;

use rx_core::config::ServerConfig;
use rx_core::{KeyPair, TrustStore};

use crate::executor::{ExecutorRegistry, ProcessTable};
use crate::session::SessionManager;

/// Global state for the server
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Server identity
    pub key_pair: KeyPair,
    /// Live trusted key set
    pub trust: TrustStore,
    /// Session manager
    pub sessions: Arc<SessionManager>,
    /// Executors by name
    pub executors: Arc<ExecutorRegistry>,
    /// Processes spawned by exec requests
    pub processes: Arc<ProcessTable>,
}

impl ServerState {
    /// Create server state with the default executors
    pub fn new(config: ServerConfig, key_pair: KeyPair, trust: TrustStore) -> Self {
        let executors = ExecutorRegistry::with_defaults(config.output_buffer_lines, &config.shells);
        Self::with_executors(config, key_pair, trust, executors)
    }

    /// Create server state with a custom executor registry
    pub fn with_executors(
        config: ServerConfig,
        key_pair: KeyPair,
        trust: TrustStore,
        executors: ExecutorRegistry,
    ) -> Self {
        Self {
            config,
            key_pair,
            trust,
            sessions: Arc::new(SessionManager::new()),
            executors: Arc::new(executors),
            processes: Arc::new(ProcessTable::new()),
        }
    }
}
