//! rootsync CLI
//!
//! Runs the sync server and inspects its store.
//!
//! # Commands
//!
//! - `serve` - Open the store and serve the administrative HTTP API only;
//!   sync transactions need a transport embedding `SyncServer::accept`
//! - `inspect` - Display store statistics
//! - `history` - Print the history of one file
//! - `share-info` - Show a share link without redeeming it
//! - `compact` - Rewrite the store log with live entries only

mod commands;

use clap::{Parser, Subcommand};
use rootsync_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// rootsync file synchronization server.
#[derive(Parser)]
#[command(name = "rootsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the administrative HTTP API (sync clients need an embedded transport)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:6120")]
        bind: SocketAddr,

        /// Password clients must present when registering
        #[arg(long)]
        password: Option<String>,

        /// Largest redemption limit a share link may have
        #[arg(long, default_value = "1000")]
        max_share_count: u64,

        /// Seconds allowed for pushing one notification
        #[arg(long, default_value = "5")]
        notify_timeout: u64,

        /// Largest accepted message in bytes
        #[arg(long, default_value = "16777216")]
        max_message_size: usize,
    },

    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the history of one file
    History {
        /// Server-side path of the file
        path: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a share link without redeeming it
    ShareInfo {
        /// Link token
        link: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the store log with live entries only
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            password,
            max_share_count,
            notify_timeout,
            max_message_size,
        } => {
            let mut config = ServerConfig::new(bind)
                .with_max_share_count(max_share_count)
                .with_notify_timeout(Duration::from_secs(notify_timeout))
                .with_max_message_size(max_message_size);
            if let Some(dir) = cli.data_dir {
                config = config.with_data_dir(dir);
            }
            if let Some(password) = password {
                config = config.with_password(password);
            }
            commands::serve::run(config)?;
        }
        Commands::Inspect { format } => {
            let path = cli.data_dir.ok_or("Store directory required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::History { path, format } => {
            let dir = cli.data_dir.ok_or("Store directory required for history")?;
            commands::history::run(&dir, &path, &format)?;
        }
        Commands::ShareInfo { link, format } => {
            let dir = cli.data_dir.ok_or("Store directory required for share-info")?;
            commands::share_info::run(&dir, &link, &format)?;
        }
        Commands::Compact => {
            let dir = cli.data_dir.ok_or("Store directory required for compact")?;
            commands::compact::run(&dir)?;
        }
        Commands::Version => {
            println!("rootsync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
