//! Key file commands

use std::path::Path;

use anyhow::{Context, Result};

use rx_core::{generate_key_pair, public_key_hex_from_file};

use crate::output::print_info;

/// Generate a key pair at `path` and print its public key
pub fn keygen_command(path: &Path) -> Result<()> {
    let key_pair = generate_key_pair(path)
        .with_context(|| format!("Failed to generate key pair at {:?}", path))?;
    println!("{}", key_pair.public_key_hex());
    print_info(&format!("Wrote {:?} ({})", path, key_pair.fingerprint()));
    Ok(())
}

/// Print the public key of the key pair at `path`
pub fn pubkey_command(path: &Path) -> Result<()> {
    let public = public_key_hex_from_file(path)
        .with_context(|| format!("Failed to read key pair from {:?}", path))?;
    println!("{}", public);
    Ok(())
}
