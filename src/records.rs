//! Dataset schemas.
//!
//! Listings and Universe are persisted as [`FlatTable`]s: the upstream JSON objects
//! flattened into dotted column names. Every downstream dataset has a typed record
//! whose field order is its column order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// --- Flattened upstream objects ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FlatTable {
    /// Flattens each object into dotted keys. Columns keep first-seen order across
    /// all rows; a row missing a column gets an empty field.
    pub fn from_objects(objects: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut flat_rows = Vec::with_capacity(objects.len());

        for object in objects {
            let mut fields = Vec::new();
            flatten_into("", object, &mut fields);
            for (key, _) in &fields {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
            flat_rows.push(fields);
        }

        let rows = flat_rows
            .into_iter()
            .map(|fields| {
                let mut row = vec![String::new(); columns.len()];
                for (key, value) in fields {
                    row[index[&key]] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(move |row| row[idx].as_str()))
    }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => flatten_object(prefix, map, out),
        other if prefix.is_empty() => {
            // A bare scalar at the top level still needs a column.
            out.push(("value".to_string(), scalar_text(other)));
        }
        other => out.push((prefix.to_string(), scalar_text(other))),
    }
}

fn flatten_object(prefix: &str, map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_object(&path, inner, out),
            other => out.push((path, scalar_text(other))),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Arrays (tags, urls) and empty objects keep their compact JSON text.
        other => other.to_string(),
    }
}

// --- Typed views ---

/// Quote currency requested from the listings endpoint. The `quote.USD.*` column
/// names below are tied to it.
pub const QUOTE_CURRENCY: &str = "USD";

/// Column layout of a typed dataset.
///
/// Written as the header even when there are no rows, and checked against the
/// header on load so a drifted file fails instead of deserializing to empties.
pub trait Schema {
    const COLUMNS: &'static [&'static str];
}

/// The columns of a Listings row that later stages consume.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Listing {
    pub id: u64,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub slug: String,
    pub cmc_rank: Option<u32>,
    #[serde(rename = "quote.USD.price", default)]
    pub price: Option<f64>,
    #[serde(rename = "quote.USD.volume_24h", default)]
    pub volume_24h: Option<f64>,
    #[serde(rename = "quote.USD.volume_change_24h", default)]
    pub volume_change_24h: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_1h", default)]
    pub percent_change_1h: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_24h", default)]
    pub percent_change_24h: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_7d", default)]
    pub percent_change_7d: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_30d", default)]
    pub percent_change_30d: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_60d", default)]
    pub percent_change_60d: Option<f64>,
    #[serde(rename = "quote.USD.percent_change_90d", default)]
    pub percent_change_90d: Option<f64>,
    #[serde(rename = "quote.USD.market_cap", default)]
    pub market_cap: Option<f64>,
    #[serde(rename = "quote.USD.market_cap_dominance", default)]
    pub market_cap_dominance: Option<f64>,
    #[serde(rename = "quote.USD.fully_diluted_market_cap", default)]
    pub fully_diluted_market_cap: Option<f64>,
    #[serde(rename = "quote.USD.tvl", default)]
    pub tvl: Option<f64>,
    #[serde(rename = "quote.USD.last_updated", default)]
    pub last_updated: Option<String>,
}

impl Schema for Listing {
    // Only what Pricing and Bitcoin-Comparison can't do without. The other quote
    // fields come and go upstream and stay nullable.
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "symbol",
        "cmc_rank",
        "quote.USD.price",
        "quote.USD.percent_change_24h",
    ];
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListingId {
    pub id: u64,
}

impl Schema for ListingId {
    const COLUMNS: &'static [&'static str] = &["id"];
}

/// One row of the user-maintained `coins_to_track.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    #[serde(rename = "Symbol")]
    pub symbol: String,
}

impl Schema for WatchlistEntry {
    const COLUMNS: &'static [&'static str] = &["Symbol"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PricingRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    pub name: String,
    pub symbol: String,
    pub slug: String,
    #[serde(rename = "CMCRank")]
    pub cmc_rank: Option<u32>,
    pub price: Option<f64>,
    pub volume24h: Option<f64>,
    pub volume_change24h: Option<f64>,
    pub percent_change1h: Option<f64>,
    pub percent_change24h: Option<f64>,
    pub percent_change7d: Option<f64>,
    pub percent_change30d: Option<f64>,
    pub percent_change60d: Option<f64>,
    pub percent_change90d: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_dominance: Option<f64>,
    pub fully_diluted_market_cap: Option<f64>,
    #[serde(rename = "TVL")]
    pub tvl: Option<f64>,
    pub last_updated: Option<String>,
    pub loaded_when: String,
    pub is_top_currency: bool,
}

impl Schema for PricingRecord {
    const COLUMNS: &'static [&'static str] = &[
        "ID",
        "Name",
        "Symbol",
        "Slug",
        "CMCRank",
        "Price",
        "Volume24h",
        "VolumeChange24h",
        "PercentChange1h",
        "PercentChange24h",
        "PercentChange7d",
        "PercentChange30d",
        "PercentChange60d",
        "PercentChange90d",
        "MarketCap",
        "MarketCapDominance",
        "FullyDilutedMarketCap",
        "TVL",
        "LastUpdated",
        "LoadedWhen",
        "IsTopCurrency",
    ];
}

impl PricingRecord {
    /// Maps the listing's `quote.USD.*` columns onto the canonical pricing names.
    pub fn from_listing(listing: &Listing, loaded_when: &str, top_rank: u32) -> Self {
        Self {
            id: listing.id,
            name: listing.name.clone(),
            symbol: listing.symbol.clone(),
            slug: listing.slug.clone(),
            cmc_rank: listing.cmc_rank,
            price: listing.price,
            volume24h: listing.volume_24h,
            volume_change24h: listing.volume_change_24h,
            percent_change1h: listing.percent_change_1h,
            percent_change24h: listing.percent_change_24h,
            percent_change7d: listing.percent_change_7d,
            percent_change30d: listing.percent_change_30d,
            percent_change60d: listing.percent_change_60d,
            percent_change90d: listing.percent_change_90d,
            market_cap: listing.market_cap,
            market_cap_dominance: listing.market_cap_dominance,
            fully_diluted_market_cap: listing.fully_diluted_market_cap,
            tvl: listing.tvl,
            last_updated: listing.last_updated.clone(),
            loaded_when: loaded_when.to_string(),
            is_top_currency: listing.cmc_rank.is_some_and(|rank| rank <= top_rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComparisonRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    pub symbol: String,
    pub name: String,
    pub bitcoin_vs_currency24h_percent_change_diff: Option<f64>,
    pub percent_change24h: Option<f64>,
    pub bitcoin_percent_change24h: Option<f64>,
    pub loaded_when: String,
}

impl Schema for ComparisonRecord {
    const COLUMNS: &'static [&'static str] = &[
        "ID",
        "Symbol",
        "Name",
        "BitcoinVsCurrency24hPercentChangeDiff",
        "PercentChange24h",
        "BitcoinPercentChange24h",
        "LoadedWhen",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageRecord {
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "AvgBitcoinVsCurrency24hPercentChangeDiff")]
    pub avg_bitcoin_vs_currency24h_percent_change_diff: Option<f64>,
}

impl Schema for AverageRecord {
    const COLUMNS: &'static [&'static str] = &["Symbol", "AvgBitcoinVsCurrency24hPercentChangeDiff"];
}

/// Ascending order with missing values last.
pub fn cmp_nullable(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
