//! pinpool CLI - run statements through a bounded connection pool
//!
//! Opens a SQLite-backed pool from flags and `PINPOOL_*` environment
//! variables, then:
//! - runs a query and prints its rows (`query`)
//! - runs a statement and prints its outcome (`exec`)
//! - prints the pool configuration and counts (`stats`)
//! - drives concurrent load through the pool (`load`)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pinpool_connection::{Pool, PoolConfig};
use pinpool_driver_sqlite::SqliteOptions;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(
    name = "pinpool",
    author,
    version,
    about = "Run SQL through a bounded, queueing connection pool"
)]
struct Cli {
    /// Database file path, `:memory:` or a `file:` URI
    ///
    /// `:memory:` runs on a single connection: each connection would
    /// otherwise get its own empty database.
    #[arg(long, short = 'd', env = "PINPOOL_DATABASE", global = true, default_value = "pinpool.db")]
    database: String,

    /// Maximum number of pooled connections (overrides PINPOOL_MAX_CONNECTIONS)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    max_connections: Option<u64>,

    /// How long to wait for a connection, in milliseconds (overrides PINPOOL_ACQUIRE_TIMEOUT_MS)
    #[arg(long, global = true)]
    acquire_timeout_ms: Option<u64>,

    /// SQLite busy timeout in milliseconds
    #[arg(long, global = true, default_value_t = pinpool_driver_sqlite::DEFAULT_BUSY_TIMEOUT_MS)]
    busy_timeout_ms: u64,

    /// Log verbosity when RUST_LOG is unset
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a query and print the returned rows
    Query(commands::QueryArgs),
    /// Run a statement and print the inserted row id and change count
    Exec(commands::ExecArgs),
    /// Print the pool configuration and connection counts
    Stats(commands::StatsArgs),
    /// Issue statements from many concurrent tasks and report timings
    Load(commands::LoadArgs),
}

impl Cli {
    fn pool_config(&self) -> Result<PoolConfig> {
        let mut config = PoolConfig::from_env().context("invalid PINPOOL_* configuration")?;

        if let Some(max) = self.max_connections {
            config = config.with_max_connections(max as usize);
        }
        if let Some(timeout_ms) = self.acquire_timeout_ms {
            config = config.with_acquire_timeout_ms(timeout_ms);
        }
        Ok(config)
    }

    fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions::new(self.database.clone()).with_busy_timeout_ms(self.busy_timeout_ms)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = cli.pool_config()?;
    let pool = Pool::sqlite(config, cli.sqlite_options());
    tracing::debug!(database = %pool.location(), "pool ready");

    let outcome = match &cli.command {
        Commands::Query(args) => commands::query(&pool, args).await,
        Commands::Exec(args) => commands::exec(&pool, args).await,
        Commands::Stats(args) => commands::stats(&pool, args).await,
        Commands::Load(args) => commands::load(&pool, args).await,
    };

    pool.close().await;
    outcome
}
