//! Direct process spawn

use async_trait::async_trait;
use tokio::process::Command;

use super::{spawn_command, ExecError, Executor, RunningProcess};

/// Runs the executable directly, without a shell
#[derive(Debug, Clone)]
pub struct DirectExecutor {
    name: String,
    buffer: usize,
}

impl DirectExecutor {
    /// The `exec` executor
    pub fn new(buffer: usize) -> Self {
        Self::named("exec", buffer)
    }

    /// A direct executor registered under another name
    pub fn named(name: impl Into<String>, buffer: usize) -> Self {
        Self {
            name: name.into(),
            buffer,
        }
    }
}

#[async_trait]
impl Executor for DirectExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, exe: &str, args: &[String]) -> Result<RunningProcess, ExecError> {
        let mut command = Command::new(exe);
        command.args(args);
        spawn_command(command, self.buffer)
    }
}
