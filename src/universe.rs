use crate::coin_market_cap::{MarketDataApi, MarketDataClient};
use crate::error::Result;
use crate::records::{FlatTable, ListingId};
use crate::stage::Stage;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info};

/// Bronze tier: static metadata for every id in the Listings dataset.
pub struct UniverseStep<'a, A> {
    config: &'a PipelineConfig,
    client: &'a MarketDataClient<A>,
    store: DatasetStore,
    timestamp: &'a ExecutionTimestamp,
}

impl<'a, A: MarketDataApi> UniverseStep<'a, A> {
    pub fn new(
        config: &'a PipelineConfig,
        client: &'a MarketDataClient<A>,
        timestamp: &'a ExecutionTimestamp,
    ) -> Self {
        Self {
            config,
            client,
            store: DatasetStore::new(),
            timestamp,
        }
    }

    /// Ids are not deduplicated: each listing row is its own trading entity.
    async fn listing_ids(&self) -> Result<Vec<u64>> {
        let rows: Vec<ListingId> = self.store.load(&self.config.listings_path(self.timestamp)).await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }
}

#[async_trait]
impl<A: MarketDataApi> Stage for UniverseStep<'_, A> {
    type Output = FlatTable;

    fn name(&self) -> &'static str {
        "Universe"
    }

    fn output_path(&self) -> PathBuf {
        self.config.universe_path(self.timestamp)
    }

    fn store(&self) -> &DatasetStore {
        &self.store
    }

    async fn generate(&self) -> Result<FlatTable> {
        let ids = self.listing_ids().await?;
        info!("Requesting metadata for {} listing ids", ids.len());

        let metadata = self.client.fetch_metadata(&ids).await.inspect_err(|e| {
            error!(
                "Failed to fetch metadata from upstream API: {}. The info endpoint is heavily rate limited; wait a few minutes and re-run with '--timestamp {}'.",
                e, self.timestamp
            );
        })?;

        let table = FlatTable::from_objects(&metadata);
        self.store.save_table(&self.output_path(), &table).await?;
        Ok(table)
    }
}
