//! # Tablegate CLI (`tablegate`)
//!
//! ## Usage
//!
//! ```bash
//! tablegate --config ./config/tablegate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tablegate init` | Create the SQLite database and run schema migrations |
//! | `tablegate serve` | Start the HTTP gateway |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tablegate::{config, db, migrate, server};

/// Tablegate: an HTTP gateway for owner-scoped document tables with
/// keyword listing and semantic search.
#[derive(Parser)]
#[command(name = "tablegate", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tablegate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the table registry.
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Start the HTTP gateway.
    ///
    /// Binds to `[server].bind`, runs migrations first, and serves until
    /// interrupted with Ctrl-C.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
