//! Sequential driver: every step of one run shares a single execution timestamp.

use crate::average_difference::AverageDifferenceStep;
use crate::bitcoin_comparison::BitcoinComparisonStep;
use crate::coin_market_cap::{MarketDataApi, MarketDataClient};
use crate::comfy_table;
use crate::error::Result;
use crate::listings::ListingsStep;
use crate::pricing::PricingStep;
use crate::stage::Stage;
use crate::storage_utils::PipelineConfig;
use crate::timestamp::ExecutionTimestamp;
use crate::universe::UniverseStep;
use tracing::info;

/// Runs every dataset step in order. Any failure stops the run; datasets
/// already written stay in place so the same timestamp can resume.
pub async fn run_datasets<A: MarketDataApi>(
    config: &PipelineConfig,
    client: &MarketDataClient<A>,
    timestamp: &ExecutionTimestamp,
) -> Result<()> {
    info!("Starting crypto workflow with following datetime stamp: {}", timestamp);

    // BRONZE TIER
    info!("Generating list of all active crypto currency listings");
    ListingsStep::new(config, client, timestamp).run().await?;

    info!(
        "Generating universe of coin metadata for all active crypto currency listings \
         (this may take a few minutes due to API throttling limitations)"
    );
    UniverseStep::new(config, client, timestamp).run().await?;

    // SILVER TIER
    info!(
        "Generating pricing dataset for coins specified in '{}'",
        config.coins_to_track_path().display()
    );
    PricingStep::new(config, timestamp).run().await?;

    // GOLD TIER
    info!("Generating dataset comparing price changes between specified coins and Bitcoin");
    BitcoinComparisonStep::new(config, timestamp).run().await?;

    info!("Generating dataset with average difference in 24h percent change vs Bitcoin across all executions");
    AverageDifferenceStep::new(config, timestamp).run().await?;

    Ok(())
}

pub async fn run_workflow<A: MarketDataApi>(
    config: &PipelineConfig,
    client: &MarketDataClient<A>,
    timestamp: &ExecutionTimestamp,
) -> Result<()> {
    run_datasets(config, client, timestamp).await?;

    info!("Gathering average difference dataset for display to end user");
    comfy_table::run(config, timestamp).await
}
