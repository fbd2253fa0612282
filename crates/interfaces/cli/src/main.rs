mod ledger_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xpush_config::AppConfig;
use xpush_store::PushLedger;

const DEFAULT_CONFIG_PATH: &str = "config/xpush.toml";

#[derive(Debug, Parser)]
#[command(
    name = "xpush",
    version,
    about = "Inspect and operate the discovery push ledger"
)]
struct Cli {
    /// TOML configuration file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Per-strategy success and delivery counters.
    Stats,
    /// Sample one quota allocation from the recorded counters.
    Allocate {
        /// Budget to split; defaults to `fetcher.discovery_limit`.
        #[arg(long)]
        total: Option<usize>,
    },
    /// Most recent deliveries.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Shift an originator's boost score.
    Boost {
        originator: u64,
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },
    /// Drop expired history and cache records and rewrite the ledger.
    Compact,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Stats => ledger_cmds::run_stats(&PushLedger::open(&config.store)?).await,
        Commands::Allocate { total } => {
            let total = total.unwrap_or(config.fetcher.discovery_limit);
            let ledger = PushLedger::open(&config.store)?;
            ledger_cmds::run_allocate(ledger, &config, total).await?;
        }
        Commands::History { limit } => {
            let ledger = PushLedger::open(&config.store)?;
            ledger_cmds::run_history(&ledger, limit.max(1)).await;
        }
        Commands::Boost { originator, delta } => {
            let ledger = PushLedger::open(&config.store)?;
            ledger_cmds::run_boost(&ledger, originator, delta).await?;
        }
        Commands::Compact => {
            let ledger = PushLedger::open(&config.store)?;
            ledger_cmds::run_compact(&ledger, &config).await?;
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}
