use crate::error::{PipelineError, Result};
use crate::pricing::select_listings;
use crate::records::{ComparisonRecord, Listing, PricingRecord, WatchlistEntry, cmp_nullable};
use crate::stage::Stage;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Gold tier: each priced asset's 24h change relative to Bitcoin's.
pub struct BitcoinComparisonStep<'a> {
    config: &'a PipelineConfig,
    store: DatasetStore,
    timestamp: &'a ExecutionTimestamp,
}

impl<'a> BitcoinComparisonStep<'a> {
    pub fn new(config: &'a PipelineConfig, timestamp: &'a ExecutionTimestamp) -> Self {
        Self {
            config,
            store: DatasetStore::new(),
            timestamp,
        }
    }

    /// Bitcoin's 24h change from this run's listings snapshot.
    async fn bitcoin_percent_change_24h(&self) -> Result<Option<f64>> {
        let listings: Vec<Listing> = self.store.load(&self.config.listings_path(self.timestamp)).await?;
        let ticker = [WatchlistEntry {
            symbol: self.config.bitcoin_symbol.clone(),
        }];
        let bitcoin = select_listings(&ticker, &listings)
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::BitcoinNotFound {
                symbol: self.config.bitcoin_symbol.clone(),
            })?;
        info!(
            "Using {} (id {}) as the Bitcoin reference: {:?}% over 24h",
            bitcoin.name, bitcoin.id, bitcoin.percent_change_24h
        );
        Ok(bitcoin.percent_change_24h)
    }
}

/// Negative means the asset moved less than Bitcoin; positive means more.
pub fn compare_to_bitcoin(pricing: &[PricingRecord], bitcoin_change: Option<f64>) -> Vec<ComparisonRecord> {
    let mut comparisons: Vec<ComparisonRecord> = pricing
        .iter()
        .map(|record| ComparisonRecord {
            id: record.id,
            symbol: record.symbol.clone(),
            name: record.name.clone(),
            bitcoin_vs_currency24h_percent_change_diff: record
                .percent_change24h
                .zip(bitcoin_change)
                .map(|(asset, bitcoin)| asset - bitcoin),
            percent_change24h: record.percent_change24h,
            bitcoin_percent_change24h: bitcoin_change,
            loaded_when: record.loaded_when.clone(),
        })
        .collect();

    // Worst relative performers first.
    comparisons.sort_by(|a, b| {
        cmp_nullable(
            a.bitcoin_vs_currency24h_percent_change_diff,
            b.bitcoin_vs_currency24h_percent_change_diff,
        )
    });
    comparisons
}

#[async_trait]
impl Stage for BitcoinComparisonStep<'_> {
    type Output = Vec<ComparisonRecord>;

    fn name(&self) -> &'static str {
        "Bitcoin comparison"
    }

    fn output_path(&self) -> PathBuf {
        self.config.bitcoin_comparison_path(self.timestamp)
    }

    fn store(&self) -> &DatasetStore {
        &self.store
    }

    async fn generate(&self) -> Result<Vec<ComparisonRecord>> {
        let pricing: Vec<PricingRecord> = self.store.load(&self.config.pricing_path(self.timestamp)).await?;
        let bitcoin_change = self.bitcoin_percent_change_24h().await?;

        let comparisons = compare_to_bitcoin(&pricing, bitcoin_change);
        self.store.save(&self.output_path(), &comparisons).await?;
        Ok(comparisons)
    }
}
