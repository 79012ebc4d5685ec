//! CoinMarketCap client.
//!
//! `MarketDataApi` is one raw HTTP call per method; `MarketDataClient` layers the
//! pagination, id batching and retries on top of it.
//!
//! Docs: https://coinmarketcap.com/api/documentation/v1/

use crate::error::{PipelineError, Result};
use crate::records::QUOTE_CURRENCY;
use crate::retry::RetryPolicy;
use crate::storage_utils::ApiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const HOST_ENV: &str = "COIN_MARKET_CAP_HOST";
pub const ACCESS_KEY_ENV: &str = "COIN_MARKET_CAP_ACCESS_KEY";

const LISTINGS_ENDPOINT: &str = "/v1/cryptocurrency/listings/latest";
const INFO_ENDPOINT: &str = "/v1/cryptocurrency/info";

#[derive(Deserialize, Debug, Default)]
pub struct ResponseStatus {
    #[serde(default)]
    pub total_count: Option<usize>,
}

/// One page of `listings/latest`.
#[derive(Deserialize, Debug, Default)]
pub struct ListingsPage {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct InfoResponse {
    #[serde(default)]
    data: Map<String, Value>,
}

#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// `start` is 1-indexed.
    async fn latest_listings(&self, start: usize, limit: usize) -> Result<ListingsPage>;

    /// Info objects for `ids`, in the order the endpoint returned them.
    async fn metadata(&self, ids: &[u64]) -> Result<Vec<Value>>;
}

pub struct CoinMarketCapApi {
    client: Client,
    host: String,
    access_key: String,
    sort: String,
}

impl CoinMarketCapApi {
    pub fn new(host: impl Into<String>, access_key: impl Into<String>, config: &ApiConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            sort: config.sort.clone(),
        })
    }

    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        let host = std::env::var(HOST_ENV)
            .map_err(|_| PipelineError::Config(format!("{} is not set", HOST_ENV)))?;
        let access_key = std::env::var(ACCESS_KEY_ENV)
            .map_err(|_| PipelineError::Config(format!("{} is not set", ACCESS_KEY_ENV)))?;
        Self::new(host, access_key, config)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.host, endpoint)
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.url(endpoint))
            .header("Accepts", "application/json")
            .header("X-CMC_PRO_API_KEY", &self.access_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl MarketDataApi for CoinMarketCapApi {
    async fn latest_listings(&self, start: usize, limit: usize) -> Result<ListingsPage> {
        let query = vec![
            ("start", start.to_string()),
            ("limit", limit.to_string()),
            ("convert", QUOTE_CURRENCY.to_string()),
            ("sort", self.sort.clone()),
        ];
        let response = self.get(LISTINGS_ENDPOINT, &query).await?;
        Ok(response.json::<ListingsPage>().await?)
    }

    async fn metadata(&self, ids: &[u64]) -> Result<Vec<Value>> {
        let ids_str = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let response = self.get(INFO_ENDPOINT, &[("id", ids_str)]).await?;
        let info = response.json::<InfoResponse>().await?;
        Ok(info.data.into_iter().map(|(_, v)| v).collect())
    }
}

/// Pagination, batching and retries over a [`MarketDataApi`].
pub struct MarketDataClient<A> {
    api: A,
    page_size: usize,
    batch_size: usize,
    listings_retry: RetryPolicy,
    metadata_retry: RetryPolicy,
}

impl<A: MarketDataApi> MarketDataClient<A> {
    pub fn new(api: A, config: &ApiConfig) -> Self {
        Self {
            api,
            page_size: config.listings_page_size.max(1),
            batch_size: config.metadata_batch_size.max(1),
            listings_retry: config.listings_retry.clone(),
            metadata_retry: config.metadata_retry.clone(),
        }
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Pages through every active listing.
    ///
    /// The total count is taken from the first page that reports a non-zero one.
    /// If no page ever does, a single page is fetched; a page with no data also
    /// ends the walk so an overstated total cannot loop forever.
    pub async fn fetch_all_listings(&self) -> Result<Vec<Value>> {
        let mut listings: Vec<Value> = Vec::new();
        let mut total_count: Option<usize> = None;
        let mut start = 1;

        while total_count.is_none_or(|total| listings.len() < total) {
            let page = self
                .listings_retry
                .retry_async("listings request", |_| self.api.latest_listings(start, self.page_size))
                .await?;

            if total_count.is_none_or(|total| total == 0) {
                total_count = Some(page.status.total_count.unwrap_or(0));
            }
            if page.data.is_empty() {
                break;
            }
            listings.extend(page.data);
            debug!("Fetched {} of {:?} listings", listings.len(), total_count);
            start = listings.len() + 1;
        }

        info!("Fetched {} listings", listings.len());
        Ok(listings)
    }

    /// Requests metadata in batches of at most `batch_size` ids, one request at a
    /// time, and concatenates the batches in order.
    pub async fn fetch_metadata(&self, ids: &[u64]) -> Result<Vec<Value>> {
        let batch_count = ids.len().div_ceil(self.batch_size);
        let mut metadata = Vec::with_capacity(ids.len());

        for (i, batch) in ids.chunks(self.batch_size).enumerate() {
            debug!("Requesting metadata batch {}/{} ({} ids)", i + 1, batch_count, batch.len());
            let objects = self
                .metadata_retry
                .retry_async("metadata request", |_| self.api.metadata(batch))
                .await?;
            metadata.extend(objects);
        }

        info!("Fetched metadata for {} assets in {} requests", metadata.len(), batch_count);
        Ok(metadata)
    }
}
