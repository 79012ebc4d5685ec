mod average_difference;
mod bitcoin_comparison;
mod coin_market_cap;
mod comfy_table;
mod error;
mod listings;
mod pricing;
mod records;
mod retry;
mod stage;
mod storage_utils;
mod timestamp;
mod universe;
mod workflow;

use clap::Parser;
use coin_market_cap::{CoinMarketCapApi, MarketDataClient};
use std::path::PathBuf;
use storage_utils::PipelineConfig;
use timestamp::ExecutionTimestamp;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "crypto-tracker",
    about = "Track watch-listed coins against Bitcoin's 24h change across executions"
)]
struct Cli {
    #[arg(
        long,
        value_name = "YYYYMMDDHHMMSS",
        help = "Execution timestamp. Reuse a previous one to resume a partially complete run"
    )]
    timestamp: Option<String>,
    #[arg(long, value_name = "FILE", help = "JSON pipeline configuration")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Data lake root, overrides the configuration file")]
    data_lake: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crypto_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let timestamp = match cli.timestamp.as_deref() {
        Some(raw) => {
            info!("Timestamp provided. Will attempt to use cached values when executing.");
            ExecutionTimestamp::parse(raw).inspect_err(|e| error!("{}", e))?
        }
        None => ExecutionTimestamp::now(),
    };

    let config = match (&cli.config, cli.data_lake) {
        (Some(path), data_lake) => {
            let mut config = PipelineConfig::from_file(path).await?;
            if let Some(data_lake) = data_lake {
                config.data_lake = data_lake;
            }
            config
        }
        (None, Some(data_lake)) => PipelineConfig::rooted_at(data_lake),
        (None, None) => PipelineConfig::default(),
    };

    let api = CoinMarketCapApi::from_env(&config.api)?;
    let client = MarketDataClient::new(api, &config.api);

    workflow::run_workflow(&config, &client, &timestamp)
        .await
        .inspect_err(|e| error!("Workflow stopped: {}", e))?;
    Ok(())
}
