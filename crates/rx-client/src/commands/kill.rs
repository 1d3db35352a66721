//! Kill command implementation

use anyhow::Result;

use crate::output::{print_error, print_success, print_warning};
use crate::session::Session;

/// Kill each process in `pids`
pub async fn kill_command(session: &Session, pids: &[u32]) -> Result<()> {
    let mut errors = 0;

    for &pid in pids {
        match session.kill(pid).await {
            Ok(response) if response.killed => {
                print_success(&format!("Killed process {}", pid));
            }
            Ok(_) => {
                print_warning(&format!("Process {} is not running", pid));
            }
            Err(e) => {
                print_error(&format!("Failed to kill process {}: {}", pid, e));
                errors += 1;
            }
        }
    }

    if errors > 0 {
        anyhow::bail!("Failed to kill {} process(es)", errors);
    }
    Ok(())
}
