//! Executors run commands on behalf of authenticated clients
//!
//! An executor is a named way of turning `(exe, args)` into a running
//! process. The built-in `exec` executor spawns the executable directly;
//! `shell` hands the command line to the platform shell. Further shells are
//! added from the server configuration.

mod direct;
mod process;
mod shell;

pub use direct::DirectExecutor;
pub use process::{spawn_command, ProcessTable, RunningProcess};
pub use shell::ShellExecutor;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use rx_core::config::ShellConfig;

/// Errors raised while starting a process
#[derive(Error, Debug)]
pub enum ExecError {
    /// No executor registered under the requested name
    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    /// The OS refused to start the process
    #[error("Failed to spawn {exe}: {source}")]
    SpawnFailed {
        exe: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited before its pid could be read
    #[error("Spawned process has no pid")]
    NoPid,

    /// Command line cannot be represented for the shell
    #[error("Invalid command line: {0}")]
    InvalidCommand(String),
}

/// A named capability that spawns processes
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name clients use to select this executor
    fn name(&self) -> &str;

    /// Start `exe` with `args`
    async fn spawn(&self, exe: &str, args: &[String]) -> Result<RunningProcess, ExecError>;
}

/// Executors by name
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `exec`, `shell` and the configured shells
    pub fn with_defaults(buffer: usize, shells: &BTreeMap<String, ShellConfig>) -> Self {
        let mut registry = Self::new();
        registry.register(DirectExecutor::new(buffer));
        registry.register(ShellExecutor::system(buffer));
        for (name, shell) in shells {
            registry.register(ShellExecutor::new(
                name.clone(),
                shell.program.clone(),
                shell.flag.clone(),
                buffer,
            ));
        }
        registry
    }

    /// Add an executor, replacing any with the same name
    pub fn register(&mut self, executor: impl Executor + 'static) {
        let name = executor.name().to_string();
        if self.executors.insert(name.clone(), Arc::new(executor)).is_some() {
            tracing::debug!("Replaced executor '{}'", name);
        }
    }

    /// Look up an executor by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Executor>, ExecError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::UnknownExecutor(name.to_string()))
    }

    /// Registered executor names
    pub fn names(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }
}
