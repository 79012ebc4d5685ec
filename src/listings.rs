use crate::coin_market_cap::{MarketDataApi, MarketDataClient};
use crate::error::Result;
use crate::records::FlatTable;
use crate::stage::Stage;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Bronze tier: every active listing, quote blocks flattened to dotted columns.
pub struct ListingsStep<'a, A> {
    config: &'a PipelineConfig,
    client: &'a MarketDataClient<A>,
    store: DatasetStore,
    timestamp: &'a ExecutionTimestamp,
}

impl<'a, A: MarketDataApi> ListingsStep<'a, A> {
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
}

#[async_trait]
impl<A: MarketDataApi> Stage for ListingsStep<'_, A> {
    type Output = FlatTable;

    fn name(&self) -> &'static str {
        "Listings"
    }

    fn output_path(&self) -> PathBuf {
        self.config.listings_path(self.timestamp)
    }

    fn store(&self) -> &DatasetStore {
        &self.store
    }

    async fn generate(&self) -> Result<FlatTable> {
        let listings = self.client.fetch_all_listings().await.inspect_err(|e| {
            error!(
                "Failed to fetch listings from upstream API: {}. Check COIN_MARKET_CAP_HOST / COIN_MARKET_CAP_ACCESS_KEY and API plan limits, then re-run with '--timestamp {}'.",
                e, self.timestamp
            );
        })?;

        let table = FlatTable::from_objects(&listings);
        if table.is_empty() {
            warn!("Upstream returned no listings; later steps will have nothing to join against");
        }
        info!("Flattened {} listings into {} columns", table.len(), table.columns.len());
        self.store.save_table(&self.output_path(), &table).await?;
        Ok(table)
    }
}
