//! Spawned processes and the table of live processes

use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use rx_protocol::{ExitStatus, MAX_LINE_BYTES};

use super::ExecError;

/// A process started by an executor.
///
/// Output lines from stdout and stderr arrive on `lines` in the order they
/// were read. `lines` closes once both pipes reach end of file; `exit`
/// resolves when the process has been reaped.
pub struct RunningProcess {
    /// OS process id
    pub pid: u32,
    /// Output lines without their line terminators
    pub lines: mpsc::Receiver<String>,
    /// Exit status
    pub exit: oneshot::Receiver<ExitStatus>,
    kill: CancellationToken,
    finished: CancellationToken,
}

impl RunningProcess {
    /// Token that kills the process when cancelled
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Token cancelled once the process has exited
    pub fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.pid)
            .field("finished", &self.finished.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Spawn `command` with piped output relayed through a channel of
/// `buffer` lines.
pub fn spawn_command(mut command: Command, buffer: usize) -> Result<RunningProcess, ExecError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecError::SpawnFailed {
        exe: program.clone(),
        source,
    })?;
    let pid = child.id().ok_or(ExecError::NoPid)?;

    let (tx, lines) = mpsc::channel(buffer.max(1));
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(relay_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(relay_lines(stderr, tx.clone()));
    }
    drop(tx);

    let kill = CancellationToken::new();
    let finished = CancellationToken::new();
    let (exit_tx, exit) = oneshot::channel();

    let kill_token = kill.clone();
    let finished_token = finished.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_token.cancelled() => {
                tracing::info!("Killing process {}", pid);
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill process {}: {}", pid, e);
                }
                child.wait().await
            }
        };

        let status = match status {
            Ok(status) => ExitStatus::from_code(status.code()),
            Err(e) => {
                tracing::warn!("Failed to wait for process {}: {}", pid, e);
                ExitStatus::Signal
            }
        };
        tracing::debug!("Process {} exited: {:?}", pid, status);

        finished_token.cancel();
        let _ = exit_tx.send(status);
    });

    tracing::info!("Spawned {} (pid {})", program, pid);
    Ok(RunningProcess {
        pid,
        lines,
        exit,
        kill,
        finished,
    })
}

/// Forward lines from a pipe until end of file or until nobody listens.
///
/// Lines longer than [`MAX_LINE_BYTES`] are forwarded in pieces, measured
/// after invalid UTF-8 has been replaced.
async fn relay_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf);
                let mut rest: &str = &line;
                loop {
                    let mut end = rest.len().min(MAX_LINE_BYTES);
                    while !rest.is_char_boundary(end) {
                        end -= 1;
                    }
                    let (piece, tail) = rest.split_at(end);
                    if tx.send(piece.to_string()).await.is_err() {
                        return;
                    }
                    rest = tail;
                    if rest.is_empty() {
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
}

struct TrackedProcess {
    kill: CancellationToken,
    finished: CancellationToken,
}

/// Live processes spawned by this server, by pid
#[derive(Default)]
pub struct ProcessTable {
    processes: DashMap<u32, TrackedProcess>,
}

impl ProcessTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `process` until it exits
    pub fn track(self: &Arc<Self>, process: &RunningProcess) {
        let pid = process.pid;
        let finished = process.finished_token();
        self.processes.insert(
            pid,
            TrackedProcess {
                kill: process.kill_token(),
                finished: finished.clone(),
            },
        );

        let table = Arc::clone(self);
        tokio::spawn(async move {
            finished.cancelled().await;
            table.processes.remove(&pid);
        });
    }

    /// Kill a tracked process.
    ///
    /// Returns false if the pid is unknown or the process already finished.
    pub fn kill(&self, pid: u32) -> bool {
        match self.processes.get(&pid) {
            Some(tracked) if !tracked.finished.is_cancelled() => {
                tracked.kill.cancel();
                true
            }
            _ => false,
        }
    }

    /// Kill every tracked process, returning how many were signalled
    pub fn kill_all(&self) -> usize {
        let mut count = 0;
        for entry in self.processes.iter() {
            if !entry.finished.is_cancelled() {
                entry.kill.cancel();
                count += 1;
            }
        }
        count
    }

    /// Number of tracked processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect(mut process: RunningProcess) -> (Vec<String>, ExitStatus) {
        let mut lines = Vec::new();
        while let Some(line) = process.lines.recv().await {
            lines.push(line);
        }
        (lines, process.exit.await.unwrap())
    }

    #[tokio::test]
    async fn test_lines_in_order() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("for i in 1 2 3 4 5; do echo line$i; done");
        let process = spawn_command(command, 2).unwrap();

        let (lines, status) = collect(process).await;
        assert_eq!(lines, vec!["line1", "line2", "line3", "line4", "line5"]);
        assert_eq!(status, ExitStatus::Code(0));
    }

    #[tokio::test]
    async fn test_stderr_and_exit_code() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo oops >&2; exit 3");
        let (lines, status) = collect(spawn_command(command, 8).unwrap()).await;
        assert_eq!(lines, vec!["oops"]);
        assert_eq!(status, ExitStatus::Code(3));
    }

    #[tokio::test]
    async fn test_long_output_is_split() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("head -c 200000 /dev/zero | tr '\\0' 'a'; echo; echo done");
        let (lines, status) = collect(spawn_command(command, 8).unwrap()).await;

        assert_eq!(status, ExitStatus::Code(0));
        assert_eq!(lines.last().map(String::as_str), Some("done"));
        let body = &lines[..lines.len() - 1];
        assert!(body.len() >= 4);
        assert!(body.iter().all(|l| l.len() <= MAX_LINE_BYTES));
        assert_eq!(body.iter().map(String::len).sum::<usize>(), 200_000);
        assert!(body.iter().all(|l| l.bytes().all(|b| b == b'a')));
    }

    #[tokio::test]
    async fn test_invalid_utf8_stays_within_line_cap() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("head -c 70000 /dev/zero | tr '\\0' '\\377'");
        let (lines, status) = collect(spawn_command(command, 8).unwrap()).await;

        assert_eq!(status, ExitStatus::Code(0));
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_BYTES));
        let replaced: usize = lines.iter().map(|l| l.chars().count()).sum();
        assert_eq!(replaced, 70_000);
        assert!(lines.iter().all(|l| l.chars().all(|c| c == '\u{fffd}')));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let result = spawn_command(Command::new("/definitely/not/a/binary"), 8);
        assert!(matches!(result, Err(ExecError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_kill_tracked_process() {
        let table = Arc::new(ProcessTable::new());
        let mut command = Command::new("sleep");
        command.arg("30");
        let process = spawn_command(command, 8).unwrap();
        let pid = process.pid;
        let finished = process.finished_token();
        table.track(&process);

        assert_eq!(table.len(), 1);
        assert!(table.kill(pid));

        let (_, status) = tokio::time::timeout(Duration::from_secs(5), collect(process))
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Signal);

        finished.cancelled().await;
        assert!(!table.kill(pid));
        assert!(!table.kill(999_999_999));
    }
}
