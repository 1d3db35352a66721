//! remexec server daemon
//!
//! Accepts authenticated sessions from clients whose public keys are listed
//! in the trusted keys file and runs commands on their behalf.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rx_core::config::{self, ServerConfig};
use rx_core::{
    generate_key_pair, load_key_pair, load_trusted_keys, public_key_hex_from_file,
    watch_trusted_keys, TrustStore,
};
use rx_server::lifecycle::{self, ShutdownOutcome};
use rx_server::ServerState;

#[derive(Parser)]
#[command(name = "rx-server")]
#[command(about = "remexec remote execution server")]
#[command(version)]
struct Args {
    /// Generate a new key pair at this path, print its public key and exit
    #[arg(long, value_name = "PATH")]
    genpem: Option<PathBuf>,

    /// Print the public key of this key file and exit
    #[arg(long, value_name = "PATH")]
    pub_from_pem: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    address: Option<String>,

    /// Server key file (overrides config)
    #[arg(long, value_name = "PATH")]
    server_pem: Option<PathBuf>,

    /// Trusted client keys file (overrides config)
    #[arg(long, value_name = "PATH")]
    allowed_public_keys_file: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &args.genpem {
        let key_pair = generate_key_pair(path)
            .with_context(|| format!("Failed to generate key pair at {:?}", path))?;
        println!("{}", key_pair.public_key_hex());
        return Ok(());
    }

    if let Some(path) = &args.pub_from_pem {
        let public = public_key_hex_from_file(path)
            .with_context(|| format!("Failed to read key pair from {:?}", path))?;
        println!("{}", public);
        return Ok(());
    }

    let config = load_server_config(&args)?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("remexec server starting...");

    let key_pair = load_key_pair(&config.key_path)
        .with_context(|| format!("Failed to load server key from {:?}", config.key_path))?;
    tracing::info!("Server key fingerprint: {}", key_pair.fingerprint());

    let trusted = load_trusted_keys(&config.allowed_keys_path).with_context(|| {
        format!(
            "Failed to load trusted keys from {:?}",
            config.allowed_keys_path
        )
    })?;
    if trusted.is_empty() {
        bail!(
            "No trusted keys in {:?} - refusing to start",
            config.allowed_keys_path
        );
    }

    let trust = TrustStore::new(trusted);
    let watcher = watch_trusted_keys(&config.allowed_keys_path, trust.clone())
        .context("Failed to watch trusted keys file")?;

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    let state = Arc::new(ServerState::new(config, key_pair, trust));
    tracing::info!("Executors: {}", state.executors.names().join(", "));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        lifecycle::shutdown_signal().await;
        cancel_clone.cancel();
    });

    let outcome = lifecycle::run(state, listener, cancel).await;
    drop(watcher);

    tracing::info!("Server shutdown complete");
    if outcome == ShutdownOutcome::Forced {
        std::process::exit(outcome.exit_code());
    }
    Ok(())
}

/// Load the configuration file and apply command line overrides
fn load_server_config(args: &Args) -> Result<ServerConfig> {
    let mut config: ServerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_server_config_path();
        config::load_config_or_default(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))?
    };

    if let Some(address) = &args.address {
        config.bind_address = address.clone();
    }
    if let Some(path) = &args.server_pem {
        config.key_path = path.clone();
    }
    if let Some(path) = &args.allowed_public_keys_file {
        config.allowed_keys_path = path.clone();
    }
    Ok(config)
}
