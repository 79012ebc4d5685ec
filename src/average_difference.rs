use crate::error::{PipelineError, Result};
use crate::records::{AverageRecord, ComparisonRecord, cmp_nullable};
use crate::stage::Stage;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Gold tier: mean Bitcoin diff per symbol across every comparison ever written.
///
/// Re-aggregates from scratch on each run, so every historical comparison file
/// must still be present and readable.
pub struct AverageDifferenceStep<'a> {
    config: &'a PipelineConfig,
    store: DatasetStore,
    timestamp: &'a ExecutionTimestamp,
}

impl<'a> AverageDifferenceStep<'a> {
    pub fn new(config: &'a PipelineConfig, timestamp: &'a ExecutionTimestamp) -> Self {
        Self {
            config,
            store: DatasetStore::new(),
            timestamp,
        }
    }

    async fn read_all_bitcoin_comparisons(&self) -> Result<Vec<ComparisonRecord>> {
        let directory = self.config.directory(&self.config.datasets.bitcoin_comparison);
        let files = self.store.list_csv_files(&directory).await?;
        if files.is_empty() {
            return Err(PipelineError::NoComparisonDatasets { directory });
        }

        let mut all = Vec::new();
        for file in &files {
            let rows: Vec<ComparisonRecord> = self.store.load(file).await?;
            all.extend(rows);
        }
        info!("Read {} comparison rows from {} executions", all.len(), files.len());
        Ok(all)
    }
}

/// Groups by symbol and averages the diff, ignoring missing values. Symbols
/// whose diffs are all missing keep an empty average. Sorted ascending.
pub fn average_by_symbol(comparisons: &[ComparisonRecord]) -> Vec<AverageRecord> {
    let mut order: Vec<&str> = Vec::new();
    let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();

    for row in comparisons {
        let entry = sums.entry(row.symbol.as_str()).or_insert_with(|| {
            order.push(row.symbol.as_str());
            (0.0, 0)
        });
        if let Some(diff) = row.bitcoin_vs_currency24h_percent_change_diff {
            entry.0 += diff;
            entry.1 += 1;
        }
    }

    let mut averages: Vec<AverageRecord> = order
        .into_iter()
        .map(|symbol| {
            let (sum, count) = sums[symbol];
            AverageRecord {
                symbol: symbol.to_string(),
                avg_bitcoin_vs_currency24h_percent_change_diff: (count > 0).then(|| sum / count as f64),
            }
        })
        .collect();

    averages.sort_by(|a, b| {
        cmp_nullable(
            a.avg_bitcoin_vs_currency24h_percent_change_diff,
            b.avg_bitcoin_vs_currency24h_percent_change_diff,
        )
    });
    averages
}

#[async_trait]
impl Stage for AverageDifferenceStep<'_> {
    type Output = Vec<AverageRecord>;

    fn name(&self) -> &'static str {
        "Average difference"
    }

    fn output_path(&self) -> PathBuf {
        self.config.avg_bitcoin_diff_path(self.timestamp)
    }

    fn store(&self) -> &DatasetStore {
        &self.store
    }

    async fn generate(&self) -> Result<Vec<AverageRecord>> {
        let comparisons = self.read_all_bitcoin_comparisons().await?;
        let averages = average_by_symbol(&comparisons);
        self.store.save(&self.output_path(), &averages).await?;
        Ok(averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn comparison(symbol: &str, diff: Option<f64>) -> ComparisonRecord {
        ComparisonRecord {
            id: 1,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            bitcoin_vs_currency24h_percent_change_diff: diff,
            percent_change24h: diff,
            bitcoin_percent_change24h: Some(0.0),
            loaded_when: "2025-01-16T00:00:00.000Z".to_string(),
        }
    }

    async fn seed_comparison(config: &PipelineConfig, stamp: &str, rows: &[ComparisonRecord]) {
        let timestamp = ExecutionTimestamp::parse(stamp).unwrap();
        DatasetStore::new()
            .save(&config.bitcoin_comparison_path(&timestamp), rows)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn averages_across_every_historical_comparison() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        // Written out of timestamp order on purpose.
        seed_comparison(&config, "20250118000000", &[comparison("ETH", Some(3.0)), comparison("XRP", Some(-4.0))]).await;
        seed_comparison(&config, "20250116000000", &[comparison("ETH", Some(1.0))]).await;
        seed_comparison(&config, "20250117000000", &[comparison("ETH", Some(2.0)), comparison("XRP", Some(-2.0))]).await;
        let timestamp = ExecutionTimestamp::parse("20250118000000").unwrap();
        let step = AverageDifferenceStep::new(&config, &timestamp);

        let averages = step.run().await.unwrap().unwrap();

        assert_eq!(
            averages,
            vec![
                AverageRecord {
                    symbol: "XRP".into(),
                    avg_bitcoin_vs_currency24h_percent_change_diff: Some(-3.0)
                },
                AverageRecord {
                    symbol: "ETH".into(),
                    avg_bitcoin_vs_currency24h_percent_change_diff: Some(2.0)
                },
            ]
        );
        let stored: Vec<AverageRecord> = DatasetStore::new()
            .load(&config.avg_bitcoin_diff_path(&timestamp))
            .await
            .unwrap();
        assert_eq!(stored, averages);

        // A later comparison does not change an already written average.
        seed_comparison(&config, "20250119000000", &[comparison("ETH", Some(100.0))]).await;
        assert!(step.run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_comparison_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        tokio::fs::create_dir_all(config.directory(&config.datasets.bitcoin_comparison))
            .await
            .unwrap();
        let timestamp = ExecutionTimestamp::parse("20250116000000").unwrap();

        let err = AverageDifferenceStep::new(&config, &timestamp).run().await.unwrap_err();

        assert!(matches!(err, PipelineError::NoComparisonDatasets { .. }));
    }

    #[tokio::test]
    async fn malformed_history_file_aborts() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        seed_comparison(&config, "20250116000000", &[comparison("ETH", Some(1.0))]).await;
        let bad = config
            .directory(&config.datasets.bitcoin_comparison)
            .join("bitcoin_comparison_20250117000000.csv");
        tokio::fs::write(&bad, "ID,Symbol\nnot-an-id,ETH\n").await.unwrap();
        let timestamp = ExecutionTimestamp::parse("20250117000000").unwrap();

        let err = AverageDifferenceStep::new(&config, &timestamp).run().await.unwrap_err();

        match err {
            PipelineError::Dataset { path, .. } => assert_eq!(path, bad),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_diffs_are_skipped_in_the_mean() {
        let rows = vec![
            comparison("ADA", None),
            comparison("ADA", Some(4.0)),
            comparison("NEW", None),
            comparison("SOL", Some(-1.0)),
        ];

        let averages = average_by_symbol(&rows);

        let summary: Vec<_> = averages
            .iter()
            .map(|a| (a.symbol.as_str(), a.avg_bitcoin_vs_currency24h_percent_change_diff))
            .collect();
        assert_eq!(summary, vec![("SOL", Some(-1.0)), ("ADA", Some(4.0)), ("NEW", None)]);
    }
}
