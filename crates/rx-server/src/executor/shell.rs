//! Shell executors

use async_trait::async_trait;
use tokio::process::Command;

use super::{spawn_command, ExecError, Executor, RunningProcess};

/// Runs a command line through a shell: `<program> <flag> <line>`.
///
/// With arguments, the command line is the shell-quoted join of `exe` and
/// `args`. Without arguments, `exe` is passed through unchanged so that a
/// whole pipeline can be sent as one string.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    name: String,
    program: String,
    flag: String,
    buffer: usize,
}

impl ShellExecutor {
    /// Create a shell executor
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        flag: impl Into<String>,
        buffer: usize,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            flag: flag.into(),
            buffer,
        }
    }

    /// The `shell` executor: `cmd /C` on Windows, `sh -c` elsewhere
    pub fn system(buffer: usize) -> Self {
        if cfg!(windows) {
            Self::new("shell", "cmd", "/C", buffer)
        } else {
            Self::new("shell", "sh", "-c", buffer)
        }
    }

    /// Build the command line handed to the shell
    pub fn command_line(exe: &str, args: &[String]) -> Result<String, ExecError> {
        if args.is_empty() {
            return Ok(exe.to_string());
        }
        let words = std::iter::once(exe).chain(args.iter().map(String::as_str));
        shlex::try_join(words).map_err(|e| ExecError::InvalidCommand(e.to_string()))
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, exe: &str, args: &[String]) -> Result<RunningProcess, ExecError> {
        let line = Self::command_line(exe, args)?;
        tracing::debug!("{} {} {:?}", self.program, self.flag, line);

        let mut command = Command::new(&self.program);
        command.arg(&self.flag).arg(line);
        spawn_command(command, self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_args() {
        let line =
            ShellExecutor::command_line("echo", &["a b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(line, "echo 'a b' c");
    }

    #[test]
    fn test_command_line_passthrough() {
        let line = ShellExecutor::command_line("ls | wc -l", &[]).unwrap();
        assert_eq!(line, "ls | wc -l");
    }

    #[test]
    fn test_command_line_rejects_nul() {
        let result = ShellExecutor::command_line("echo", &["a\0b".to_string()]);
        assert!(matches!(result, Err(ExecError::InvalidCommand(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_pipeline() {
        let executor = ShellExecutor::system(8);
        let mut process = executor
            .spawn("printf 'x\\ny\\n' | wc -l", &[])
            .await
            .unwrap();
        let line = process.lines.recv().await.unwrap();
        assert_eq!(line.trim(), "2");
    }
}
