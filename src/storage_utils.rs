use crate::error::{PipelineError, Result};
use crate::records::{FlatTable, Schema};
use crate::retry::RetryPolicy;
use crate::timestamp::ExecutionTimestamp;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};

// CONFIGURATION STRUCTS

/// Where one dataset lives: a directory under the lake root and a file-name
/// template whose `{}` is replaced by the execution timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetLocation {
    pub directory: String,
    pub file_format: String,
}

impl DatasetLocation {
    fn new(directory: &str, file_format: &str) -> Self {
        Self {
            directory: directory.to_string(),
            file_format: file_format.to_string(),
        }
    }

    pub fn file_name(&self, timestamp: &ExecutionTimestamp) -> String {
        self.file_format.replace("{}", timestamp.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DatasetsConfig {
    pub listings: DatasetLocation,
    pub universe: DatasetLocation,
    pub pricing: DatasetLocation,
    pub bitcoin_comparison: DatasetLocation,
    pub avg_bitcoin_diff: DatasetLocation,
    /// Relative path of the watch-list (`Symbol` column).
    pub coins_to_track: String,
}

impl Default for DatasetsConfig {
    fn default() -> Self {
        Self {
            listings: DatasetLocation::new("listings", "crypto_listings_{}.csv"),
            universe: DatasetLocation::new("universe", "crypto_universe_{}.csv"),
            pricing: DatasetLocation::new("pricing", "coins_pricing_{}.csv"),
            bitcoin_comparison: DatasetLocation::new("bitcoin_comparison", "bitcoin_comparison_{}.csv"),
            avg_bitcoin_diff: DatasetLocation::new("avg_bitcoin_diff", "avg_bitcoin_diff_{}.csv"),
            coins_to_track: "configuration/coins_to_track.csv".to_string(),
        }
    }
}

/// Listings are always requested in USD, the currency the Listings schema reads;
/// unknown keys (such as a `convert` override) are rejected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub listings_page_size: usize,
    /// Ids per info request.
    ///
    /// Keeps the query string under a ~2000 char URI:
    /// (2000 - 60 host and `?id=`) / (5 digit id + 2 growth buffer + 1 comma) = 242.5
    pub metadata_batch_size: usize,
    pub sort: String,
    pub listings_retry: RetryPolicy,
    pub metadata_retry: RetryPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listings_page_size: 5000,
            metadata_batch_size: 240,
            sort: "market_cap".to_string(),
            listings_retry: RetryPolicy::listings(),
            metadata_retry: RetryPolicy::metadata(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_lake: PathBuf,
    pub datasets: DatasetsConfig,
    pub api: ApiConfig,
    /// `IsTopCurrency` is set for ranks at or below this.
    pub top_currency_rank: u32,
    pub bitcoin_symbol: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_lake: PathBuf::from("data_lake"),
            datasets: DatasetsConfig::default(),
            api: ApiConfig::default(),
            top_currency_rank: 10,
            bitcoin_symbol: "BTC".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn rooted_at<P: Into<PathBuf>>(data_lake: P) -> Self {
        Self {
            data_lake: data_lake.into(),
            ..Self::default()
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read(path).await.map_err(|e| {
            error!("ERROR reading configuration at '{}'", path.display());
            PipelineError::from(e).at_path(path)
        })?;
        serde_json::from_slice(&content).map_err(|e| PipelineError::from(e).at_path(path))
    }

    pub fn directory(&self, location: &DatasetLocation) -> PathBuf {
        self.data_lake.join(&location.directory)
    }

    pub fn dataset_path(&self, location: &DatasetLocation, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.directory(location).join(location.file_name(timestamp))
    }

    pub fn listings_path(&self, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.dataset_path(&self.datasets.listings, timestamp)
    }

    pub fn universe_path(&self, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.dataset_path(&self.datasets.universe, timestamp)
    }

    pub fn pricing_path(&self, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.dataset_path(&self.datasets.pricing, timestamp)
    }

    pub fn bitcoin_comparison_path(&self, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.dataset_path(&self.datasets.bitcoin_comparison, timestamp)
    }

    pub fn avg_bitcoin_diff_path(&self, timestamp: &ExecutionTimestamp) -> PathBuf {
        self.dataset_path(&self.datasets.avg_bitcoin_diff, timestamp)
    }

    pub fn coins_to_track_path(&self) -> PathBuf {
        self.data_lake.join(&self.datasets.coins_to_track)
    }
}

// STORAGE MANAGER

/// CSV persistence for the data lake. Every dataset is written with a header row,
/// in the column order of its schema, and without an index column.
#[derive(Debug, Clone, Default)]
pub struct DatasetStore;

impl DatasetStore {
    pub fn new() -> Self {
        Self
    }

    /// Only a confirmed absence is `false`; anything the filesystem can't answer
    /// (permissions, a file where a directory should be) is an error.
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(|e| PipelineError::from(e).at_path(path))
    }

    /// Reads typed records, logging the failing path before propagating.
    pub async fn load<T: DeserializeOwned + Schema>(&self, path: &Path) -> Result<Vec<T>> {
        Self::decode(path).await.map_err(|e| {
            error!(
                "ERROR reading dataset at '{}'. Fix input location and re-run process.",
                path.display()
            );
            e.at_path(path)
        })
    }

    async fn decode<T: DeserializeOwned + Schema>(path: &Path) -> Result<Vec<T>> {
        // Read directly into bytes; csv validates UTF-8 per field as it parses.
        let content = fs::read(path).await?;
        let mut reader = csv::Reader::from_reader(content.as_slice());
        let headers = reader.headers()?;
        let missing: Vec<String> = T::COLUMNS
            .iter()
            .filter(|&&column| !headers.iter().any(|h| h == column))
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns { columns: missing });
        }

        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }

    pub async fn save<T: Serialize + Schema>(&self, path: &Path, records: &[T]) -> Result<()> {
        let encoded = Self::encode(records);
        self.persist(path, encoded).await
    }

    pub async fn save_table(&self, path: &Path, table: &FlatTable) -> Result<()> {
        let encoded = Self::encode_table(table);
        self.persist(path, encoded).await
    }

    fn encode<T: Serialize + Schema>(records: &[T]) -> Result<Vec<u8>> {
        // csv only derives a header from the first serialized record, so an empty
        // dataset would come out as a zero-byte file.
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(T::COLUMNS)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.into_inner().map_err(|e| PipelineError::Io(e.into_error()))
    }

    fn encode_table(table: &FlatTable) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| PipelineError::Io(e.into_error()))
    }

    async fn persist(&self, path: &Path, encoded: Result<Vec<u8>>) -> Result<()> {
        let result = match encoded {
            Ok(bytes) => Self::write_atomic(path, bytes).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            error!(
                "ERROR writing dataset to file path '{}'. Fix output location and re-run process.",
                path.display()
            );
            e.at_path(path)
        })
    }

    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a .tmp sibling first so an interrupted run never leaves a partial
        // dataset that a resumed run would mistake for a finished one.
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, path).await?;
        debug!("Wrote dataset to '{}'", path.display());
        Ok(())
    }

    /// Every `.csv` file directly inside `directory`, sorted by file name.
    pub async fn list_csv_files(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(directory)
            .await
            .map_err(|e| PipelineError::from(e).at_path(directory))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "csv") && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
