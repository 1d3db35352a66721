//! Upload and download commands

use std::path::Path;

use anyhow::{Context, Result};

use rx_protocol::UploadAck;

use crate::output::{format_transfer, print_success, print_warning};
use crate::session::Session;

fn report(verb: &str, ack: &UploadAck) {
    for path in &ack.rejected {
        print_warning(&format!("Rejected {}", path));
    }
    print_success(&format_transfer(verb, ack));
}

/// Upload a local directory into a remote base path
pub async fn upload_command(session: &Session, local: &Path, remote: &str) -> Result<()> {
    let ack = session
        .upload_dir(local, remote)
        .await
        .with_context(|| format!("Failed to upload {:?} to {}", local, remote))?;
    report("Uploaded", &ack);
    Ok(())
}

/// Download a remote directory into a local one
pub async fn download_command(
    session: &Session,
    remote: &str,
    local: &Path,
    pattern: Option<&str>,
) -> Result<()> {
    let ack = session
        .download_dir(remote, local, pattern)
        .await
        .with_context(|| format!("Failed to download {} to {:?}", remote, local))?;
    report("Downloaded", &ack);
    Ok(())
}
