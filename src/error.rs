//! Pipeline error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Upstream API error: {endpoint} responded with {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(
        "Following Symbols are not valid Coin Symbols: [{}]. Please remove from the coins_to_track.csv configuration and re-run process with '--timestamp {timestamp}'.",
        quoted_list(.symbols)
    )]
    InvalidSymbols {
        symbols: Vec<String>,
        timestamp: String,
    },

    #[error("Dataset error at '{}': {source}", .path.display())]
    Dataset {
        path: PathBuf,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Invalid timestamp input: {0}. Should be in YYYYMMDDHHMMSS format for process. Re-run process with valid timestamp or omit timestamp flag.")]
    InvalidTimestamp(String),

    #[error("Missing required columns [{}]", quoted_list(.columns))]
    MissingColumns { columns: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No listing found for Bitcoin ticker '{symbol}'")]
    BitcoinNotFound { symbol: String },

    #[error("No bitcoin comparison datasets found in '{}'", .directory.display())]
    NoComparisonDatasets { directory: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wraps an error with the dataset path it happened on.
    pub fn at_path(self, path: impl Into<PathBuf>) -> Self {
        PipelineError::Dataset {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

fn quoted_list(symbols: &[String]) -> String {
    symbols
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;
