//! reqwest-backed `MarketDataApi`.

use crate::api::MarketDataApi;
use crate::error::{RestError, RestResult};
use crate::parse::{parse_depth_snapshot, parse_klines};
use async_trait::async_trait;
use mdstream_core::{Bar, Interval};
use mdstream_feed::DepthSnapshot;
use mdstream_telemetry::Metrics;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound the exchange accepts for `/klines`.
pub const MAX_KLINE_LIMIT: usize = 1000;

pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.binance.com/api/v3`
    pub fn new(base_url: impl Into<String>) -> RestResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, endpoint: &'static str, query: &[(&str, String)]) -> RestResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, ?query, "GET");

        let response = match self.client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                Metrics::rest_request(endpoint, "error");
                return Err(RestError::HttpClient(format!("HTTP request failed: {e}")));
            }
        };

        let status = response.status();
        Metrics::rest_request(endpoint, status.as_str());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint, status = status.as_u16(), %body, "REST request rejected");
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| RestError::Parse(format!("Failed to parse {endpoint} response: {e}")))
    }
}

#[async_trait]
impl MarketDataApi for RestClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> RestResult<Vec<Bar>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        info!(symbol, %interval, limit, "Fetching kline history");
        let body = self
            .get_json(
                "klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let bars = parse_klines(&body)?;
        debug!(symbol, bars = bars.len(), "Kline history received");
        Ok(bars)
    }

    async fn fetch_depth(&self, symbol: &str, limit: usize) -> RestResult<DepthSnapshot> {
        info!(symbol, limit, "Fetching depth snapshot");
        let body = self
            .get_json(
                "depth",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_depth_snapshot(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockMarketDataApi;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = RestClient::new("http://localhost:1/api/v3/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:1/api/v3");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let client =
            RestClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.fetch_depth("btcusdt", 10).await.unwrap_err();
        assert!(matches!(err, RestError::HttpClient(_)));
    }

    #[tokio::test]
    async fn test_mock_api_is_usable_as_trait_object() {
        let mut api = MockMarketDataApi::new();
        api.expect_fetch_klines()
            .withf(|symbol, interval, limit| {
                symbol == "btcusdt" && *interval == Interval::OneMinute && *limit == 2
            })
            .returning(|_, _, _| Ok(Vec::new()));

        let api: Box<dyn MarketDataApi> = Box::new(api);
        assert!(api.fetch_klines("btcusdt", Interval::OneMinute, 2).await.unwrap().is_empty());
    }
}
