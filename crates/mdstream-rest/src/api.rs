use crate::error::RestResult;
use async_trait::async_trait;
use mdstream_core::{Bar, Interval};
use mdstream_feed::DepthSnapshot;

/// Historical market data.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Most recent `limit` bars, oldest first.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> RestResult<Vec<Bar>>;

    /// Top `limit` levels per side.
    async fn fetch_depth(&self, symbol: &str, limit: usize) -> RestResult<DepthSnapshot>;
}
