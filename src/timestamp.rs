use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The single `YYYYMMDDHHMMSS` stamp shared by every dataset written in one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionTimestamp {
    raw: String,
    instant: DateTime<Utc>,
}

fn compact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{14}$").expect("static timestamp pattern"))
}

impl ExecutionTimestamp {
    pub fn parse(input: &str) -> Result<Self> {
        if !compact_pattern().is_match(input) {
            return Err(PipelineError::InvalidTimestamp(input.to_string()));
        }
        let naive = NaiveDateTime::parse_from_str(input, TIMESTAMP_FORMAT)
            .map_err(|_| PipelineError::InvalidTimestamp(input.to_string()))?;
        Ok(Self {
            raw: input.to_string(),
            instant: naive.and_utc(),
        })
    }

    pub fn now() -> Self {
        let raw = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        // Re-parse so the stored instant has the same (second) precision as the string.
        let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .unwrap_or_else(|_| Utc::now().naive_utc());
        Self {
            raw,
            instant: naive.and_utc(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// ISO-8601 rendering with millisecond precision, e.g. `2025-01-16T00:00:00.000Z`.
    pub fn loaded_when(&self) -> String {
        self.instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

impl fmt::Display for ExecutionTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
