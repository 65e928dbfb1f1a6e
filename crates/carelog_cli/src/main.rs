//! Carelog sync CLI
//!
//! Command-line tools for driving and debugging the Carelog sync engine.
//!
//! # Commands
//!
//! - `device-id` - Print this client's device ID
//! - `enqueue` - Record a local mutation and queue it for sync
//! - `status` - Show the pending sync queue
//! - `sync` - Push pending changes to a sync server
//! - `pull` - Apply server changes to the local store
//! - `serve` - Run the reference sync server
//! - `token` - Issue a bearer token for a device

mod commands;

use clap::{Parser, Subcommand};
use commands::sync::RemoteArgs;
use commands::{DataDir, Format};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Carelog offline-first sync tools.
#[derive(Parser)]
#[command(name = "carelog-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Client data directory (device ID and queue)
    #[arg(global = true, short, long, default_value = ".carelog")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Remote {
    /// Sync server base URL
    #[arg(short, long, env = "CARELOG_SERVER")]
    server: String,

    /// Bearer token
    #[arg(long, env = "CARELOG_TOKEN")]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Changes per push
    #[arg(long, default_value = "50")]
    batch_size: usize,

    /// Push attempts per batch
    #[arg(long, default_value = "5")]
    max_attempts: u32,
}

impl From<Remote> for RemoteArgs {
    fn from(remote: Remote) -> Self {
        Self {
            server: remote.server,
            token: remote.token,
            timeout: Duration::from_secs(remote.timeout),
            batch_size: remote.batch_size,
            max_attempts: remote.max_attempts,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print this client's device ID
    DeviceId,

    /// Record a local mutation and queue it for sync
    Enqueue {
        /// Entity type (feeding, sleep, diaper, ...)
        entity_type: String,

        /// Entity identifier
        entity_id: String,

        /// Operation (create, update, delete)
        #[arg(short, long, default_value = "create")]
        operation: String,

        /// Entity body as a JSON object
        #[arg(short = 'j', long, default_value = "{}")]
        data: String,

        /// Authoring caregiver ID
        #[arg(short, long)]
        caregiver: Option<String>,
    },

    /// Show the pending sync queue
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Push pending changes to a sync server
    Sync {
        #[command(flatten)]
        remote: Remote,
    },

    /// Apply server changes to the local store
    Pull {
        #[command(flatten)]
        remote: Remote,
    },

    /// Run the reference sync server
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Token signing secret; enables authentication
        #[arg(long, env = "CARELOG_AUTH_SECRET")]
        auth_secret: Option<String>,

        /// Maximum changes accepted per push
        #[arg(long, default_value = "500")]
        max_push_batch: usize,
    },

    /// Issue a bearer token for a device
    Token {
        /// Device ID the token is bound to
        device_id: String,

        /// Token signing secret
        #[arg(long, env = "CARELOG_AUTH_SECRET")]
        auth_secret: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = DataDir::new(cli.data_dir);

    match cli.command {
        Commands::DeviceId => commands::device::run(&data_dir)?,
        Commands::Enqueue {
            entity_type,
            entity_id,
            operation,
            data,
            caregiver,
        } => {
            let args = commands::enqueue::EnqueueArgs {
                entity_type,
                entity_id,
                operation,
                data,
                caregiver,
            };
            commands::enqueue::run(&data_dir, args).await?;
        }
        Commands::Status { format } => commands::status::run(&data_dir, format).await?,
        Commands::Sync { remote } => commands::sync::run_sync(&data_dir, remote.into()).await?,
        Commands::Pull { remote } => commands::sync::run_pull(&data_dir, remote.into()).await?,
        Commands::Serve {
            bind,
            auth_secret,
            max_push_batch,
        } => {
            let config =
                commands::serve::server_config(bind, auth_secret.as_deref(), max_push_batch);
            commands::serve::run(config).await?;
        }
        Commands::Token {
            device_id,
            auth_secret,
        } => commands::serve::issue_token(&auth_secret, &device_id)?,
        Commands::Version => {
            println!("Carelog sync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Carelog sync engine v{}", carelog_sync_engine::VERSION);
        }
    }

    Ok(())
}
