//! rx: remexec command line client

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rx_client::commands;
use rx_client::output::print_error;
use rx_client::{RxClient, Session};
use rx_core::config::{self, ClientConfig};
use rx_core::load_key_pair;
use rx_protocol::parse_public_key_hex;

#[derive(Parser)]
#[command(name = "rx")]
#[command(author, version, about = "Run commands on a remexec server")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server URL (overrides config)
    #[arg(short, long, global = true, env = "RX_SERVER")]
    server: Option<String>,

    /// Client key file (overrides config)
    #[arg(long, global = true, value_name = "PATH")]
    client_pem: Option<PathBuf>,

    /// Expected server public key as hex (overrides config)
    #[arg(long, global = true, value_name = "HEX")]
    server_key: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on the server and stream its output
    Exec {
        /// Executor to run the command with (exec, shell, ...)
        #[arg(short, long)]
        executor: Option<String>,
        /// Program to run
        exe: String,
        /// Arguments passed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Kill remote processes
    Kill {
        /// Process ids returned by exec
        #[arg(required = true)]
        pids: Vec<u32>,
    },

    /// Upload a local directory into a remote base path
    Upload {
        /// Local directory
        local: PathBuf,
        /// Remote base path
        remote: String,
    },

    /// Download a remote directory
    Download {
        /// Remote directory
        remote: String,
        /// Local destination directory
        local: PathBuf,
        /// Only files whose name matches this wildcard
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Generate a new key pair and print its public key
    Keygen {
        /// Where to write the key file
        path: PathBuf,
    },

    /// Print the public key of a key file
    Pubkey {
        /// Key file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Keygen { path } => {
            commands::keygen_command(path)?;
            return Ok(0);
        }
        Commands::Pubkey { path } => {
            commands::pubkey_command(path)?;
            return Ok(0);
        }
        _ => {}
    }

    let config = load_client_config(&cli)?;
    let session = connect(&config).await?;

    match cli.command {
        Commands::Exec {
            executor,
            exe,
            args,
        } => {
            let executor = executor.unwrap_or_else(|| config.executor.clone());
            commands::exec_command(&session, &executor, &exe, args).await
        }
        Commands::Kill { pids } => {
            commands::kill_command(&session, &pids).await?;
            Ok(0)
        }
        Commands::Upload { local, remote } => {
            commands::upload_command(&session, &local, &remote).await?;
            Ok(0)
        }
        Commands::Download {
            remote,
            local,
            pattern,
        } => {
            commands::download_command(&session, &remote, &local, pattern.as_deref()).await?;
            Ok(0)
        }
        Commands::Keygen { .. } | Commands::Pubkey { .. } => Ok(0),
    }
}

/// Load the configuration file and apply command line overrides
fn load_client_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config: ClientConfig = if let Some(config_path) = &cli.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_client_config_path();
        config::load_config_or_default(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))?
    };

    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(path) = &cli.client_pem {
        config.key_path = path.clone();
    }
    if let Some(key) = &cli.server_key {
        config.server_public_key = Some(key.clone());
    }
    Ok(config)
}

/// Open a session with the configured server
async fn connect(config: &ClientConfig) -> Result<Session> {
    let key_pair = load_key_pair(&config.key_path)
        .with_context(|| format!("Failed to load client key from {:?}", config.key_path))?;

    let mut client = RxClient::new(&config.server_url, key_pair)?;
    if let Some(hex) = &config.server_public_key {
        let key = parse_public_key_hex(hex).context("Invalid server public key")?;
        client = client.with_server_key(key);
    }

    client
        .open_session()
        .await
        .with_context(|| format!("Failed to open session with {}", config.server_url))
}
