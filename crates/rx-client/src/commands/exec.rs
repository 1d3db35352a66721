//! Exec command implementation

use std::io::Write;

use anyhow::{Context, Result};

use rx_protocol::{ExecRequest, ExitStatus};

use crate::exec::ExecOutcome;
use crate::output::{print_error, print_warning};
use crate::session::Session;

/// Run a remote command, copy its output to stdout and return the exit
/// code to report locally
pub async fn exec_command(
    session: &Session,
    executor: &str,
    exe: &str,
    args: Vec<String>,
) -> Result<i32> {
    let request = ExecRequest::new(executor, exe, args);
    let mut response = session
        .exec(&request)
        .await
        .with_context(|| format!("Failed to run {:?}", exe))?;
    tracing::info!("Remote process {} started", response.pid());

    let stdout = std::io::stdout();
    while let Some(line) = response.next_line().await {
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
    }

    let outcome = response.outcome().unwrap_or(ExecOutcome::Truncated);
    match outcome {
        ExecOutcome::Exited(ExitStatus::Code(_)) => {}
        ExecOutcome::Exited(ExitStatus::Signal) => {
            print_warning(&format!("Remote process {} was killed", response.pid()));
        }
        ExecOutcome::Truncated => {
            print_error("Output ended before the remote process exited");
        }
    }
    Ok(outcome.exit_code())
}
