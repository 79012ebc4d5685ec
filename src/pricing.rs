use crate::error::{PipelineError, Result};
use crate::records::{Listing, PricingRecord, WatchlistEntry};
use crate::stage::Stage;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{error, info};

/// Silver tier: the watch-list joined to the current listings.
pub struct PricingStep<'a> {
    config: &'a PipelineConfig,
    store: DatasetStore,
    timestamp: &'a ExecutionTimestamp,
}

impl<'a> PricingStep<'a> {
    pub fn new(config: &'a PipelineConfig, timestamp: &'a ExecutionTimestamp) -> Self {
        Self {
            config,
            store: DatasetStore::new(),
            timestamp,
        }
    }
}

/// Every watch-list symbol absent from the listings, in watch-list order.
pub fn invalid_symbols(watchlist: &[WatchlistEntry], listings: &[Listing]) -> Vec<String> {
    let known: HashSet<&str> = listings.iter().map(|l| l.symbol.as_str()).collect();
    watchlist
        .iter()
        .filter(|entry| !known.contains(entry.symbol.as_str()))
        .map(|entry| entry.symbol.clone())
        .collect()
}

/// Picks one listing per watched symbol: the lowest `cmc_rank`, earliest row on
/// ties, unranked rows last. Output follows the watch-list's first occurrence
/// of each symbol.
pub fn select_listings<'l>(watchlist: &[WatchlistEntry], listings: &'l [Listing]) -> Vec<&'l Listing> {
    let mut best: HashMap<&str, &Listing> = HashMap::new();
    for listing in listings {
        best.entry(listing.symbol.as_str())
            .and_modify(|current| {
                if rank_key(listing) < rank_key(current) {
                    *current = listing;
                }
            })
            .or_insert(listing);
    }

    let mut seen = HashSet::new();
    watchlist
        .iter()
        .filter(|entry| seen.insert(entry.symbol.as_str()))
        .filter_map(|entry| best.get(entry.symbol.as_str()).copied())
        .collect()
}

/// Unranked rows lose to any ranked duplicate but are still kept when they are
/// the symbol's only listing.
fn rank_key(listing: &Listing) -> u32 {
    listing.cmc_rank.unwrap_or(u32::MAX)
}

#[async_trait]
impl Stage for PricingStep<'_> {
    type Output = Vec<PricingRecord>;

    fn name(&self) -> &'static str {
        "Pricing"
    }

    fn output_path(&self) -> PathBuf {
        self.config.pricing_path(self.timestamp)
    }

    fn store(&self) -> &DatasetStore {
        &self.store
    }

    async fn generate(&self) -> Result<Vec<PricingRecord>> {
        let watchlist: Vec<WatchlistEntry> = self.store.load(&self.config.coins_to_track_path()).await?;
        let listings: Vec<Listing> = self.store.load(&self.config.listings_path(self.timestamp)).await?;

        let invalid = invalid_symbols(&watchlist, &listings);
        if !invalid.is_empty() {
            let err = PipelineError::InvalidSymbols {
                symbols: invalid,
                timestamp: self.timestamp.to_string(),
            };
            error!("{}", err);
            return Err(err);
        }

        let loaded_when = self.timestamp.loaded_when();
        let records: Vec<PricingRecord> = select_listings(&watchlist, &listings)
            .into_iter()
            .map(|listing| PricingRecord::from_listing(listing, &loaded_when, self.config.top_currency_rank))
            .collect();
        info!("Priced {} of {} watch-list entries", records.len(), watchlist.len());

        self.store.save(&self.output_path(), &records).await?;
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coin_market_cap::tests::listing;
    use crate::records::FlatTable;
    use tempfile::TempDir;

    pub async fn seed_watchlist(config: &PipelineConfig, symbols: &[&str]) {
        let entries: Vec<_> = symbols
            .iter()
            .map(|s| WatchlistEntry { symbol: s.to_string() })
            .collect();
        DatasetStore::new()
            .save(&config.coins_to_track_path(), &entries)
            .await
            .unwrap();
    }

    pub async fn seed_listings(config: &PipelineConfig, timestamp: &ExecutionTimestamp) {
        let table = FlatTable::from_objects(&[
            listing(5, "Bitcoin Wrapped", "BTC", 5, 1.0),
            listing(1, "Bitcoin", "BTC", 1, 2.0),
            listing(1027, "Ethereum", "ETH", 2, 5.0),
            listing(52, "XRP", "XRP", 11, -1.0),
            listing(74, "Dogecoin", "DOGE", 8, 0.5),
        ]);
        DatasetStore::new()
            .save_table(&config.listings_path(timestamp), &table)
            .await
            .unwrap();
    }

    fn ts() -> ExecutionTimestamp {
        ExecutionTimestamp::parse("20250116000000").unwrap()
    }

    #[tokio::test]
    async fn joins_dedups_and_enriches_watchlist() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        let timestamp = ts();
        seed_watchlist(&config, &["ETH", "BTC", "XRP", "ETH"]).await;
        seed_listings(&config, &timestamp).await;

        let records = PricingStep::new(&config, &timestamp).run().await.unwrap().unwrap();

        let summary: Vec<_> = records.iter().map(|r| (r.symbol.as_str(), r.id)).collect();
        assert_eq!(summary, vec![("ETH", 1027), ("BTC", 1), ("XRP", 52)]);
        assert!(records.iter().all(|r| r.loaded_when == "2025-01-16T00:00:00.000Z"));
        assert!(records[0].is_top_currency);
        assert!(!records[2].is_top_currency);
        assert_eq!(records[1].name, "Bitcoin");
        assert_eq!(records[1].percent_change24h, Some(2.0));

        let stored: Vec<PricingRecord> = DatasetStore::new()
            .load(&config.pricing_path(&timestamp))
            .await
            .unwrap();
        assert_eq!(stored, records);
    }

    #[tokio::test]
    async fn pricing_columns_are_canonical() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        let timestamp = ts();
        seed_watchlist(&config, &["DOGE"]).await;
        seed_listings(&config, &timestamp).await;

        PricingStep::new(&config, &timestamp).run().await.unwrap();

        let text = tokio::fs::read_to_string(config.pricing_path(&timestamp)).await.unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "ID,Name,Symbol,Slug,CMCRank,Price,Volume24h,VolumeChange24h,PercentChange1h,PercentChange24h,\
PercentChange7d,PercentChange30d,PercentChange60d,PercentChange90d,MarketCap,MarketCapDominance,\
FullyDilutedMarketCap,TVL,LastUpdated,LoadedWhen,IsTopCurrency"
        );
    }

    #[tokio::test]
    async fn invalid_symbol_aborts_without_writing() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        let timestamp = ts();
        seed_watchlist(&config, &["BTC", "APPL", "ETH"]).await;
        seed_listings(&config, &timestamp).await;

        let err = PricingStep::new(&config, &timestamp).run().await.unwrap_err();

        match &err {
            PipelineError::InvalidSymbols { symbols, timestamp } => {
                assert_eq!(symbols, &vec!["APPL".to_string()]);
                assert_eq!(timestamp, "20250116000000");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("['APPL']"));
        assert!(!config.pricing_path(&ts()).exists());
    }

    #[tokio::test]
    async fn existing_pricing_dataset_is_reused() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        let timestamp = ts();
        seed_watchlist(&config, &["BTC"]).await;
        seed_listings(&config, &timestamp).await;
        let step = PricingStep::new(&config, &timestamp);

        assert!(step.run().await.unwrap().is_some());
        let before = tokio::fs::read(config.pricing_path(&timestamp)).await.unwrap();

        // A now-invalid watch-list must not matter once the dataset exists.
        seed_watchlist(&config, &["APPL"]).await;
        assert!(step.run().await.unwrap().is_none());
        let after = tokio::fs::read(config.pricing_path(&timestamp)).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn listings_in_another_currency_abort_without_writing() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        let timestamp = ts();
        seed_watchlist(&config, &["BTC"]).await;
        let table = FlatTable::from_objects(&[serde_json::json!({
            "id": 1,
            "name": "Bitcoin",
            "symbol": "BTC",
            "cmc_rank": 1,
            "quote": {"EUR": {"price": 93000.0, "percent_change_24h": 2.0}}
        })]);
        DatasetStore::new()
            .save_table(&config.listings_path(&timestamp), &table)
            .await
            .unwrap();

        let err = PricingStep::new(&config, &timestamp).run().await.unwrap_err();

        match err {
            PipelineError::Dataset { path, source } => {
                assert_eq!(path, config.listings_path(&timestamp));
                assert!(matches!(*source, PipelineError::MissingColumns { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!config.pricing_path(&timestamp).exists());
    }

    fn dup(id: u64, rank: Option<u32>) -> Listing {
        Listing {
            id,
            name: format!("n{id}"),
            symbol: "DUP".into(),
            slug: String::new(),
            cmc_rank: rank,
            price: None,
            volume_24h: None,
            volume_change_24h: None,
            percent_change_1h: None,
            percent_change_24h: None,
            percent_change_7d: None,
            percent_change_30d: None,
            percent_change_60d: None,
            percent_change_90d: None,
            market_cap: None,
            market_cap_dominance: None,
            fully_diluted_market_cap: None,
            tvl: None,
            last_updated: None,
        }
    }

    #[test]
    fn dedup_prefers_first_row_on_rank_tie() {
        let listings = vec![dup(1, None), dup(2, Some(7)), dup(3, Some(7))];
        let watchlist = vec![WatchlistEntry { symbol: "DUP".into() }];

        let picked = select_listings(&watchlist, &listings);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, 2);
    }

    #[test]
    fn unranked_listing_is_kept_when_it_is_the_only_match() {
        let listings = vec![dup(9, None)];
        let watchlist = vec![WatchlistEntry { symbol: "DUP".into() }];

        let picked = select_listings(&watchlist, &listings);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, 9);
        assert!(invalid_symbols(&watchlist, &listings).is_empty());

        let record = PricingRecord::from_listing(picked[0], "2025-01-16T00:00:00.000Z", 10);
        assert_eq!(record.cmc_rank, None);
        assert!(!record.is_top_currency);
    }
}
