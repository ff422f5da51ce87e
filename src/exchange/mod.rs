pub mod bybit;
pub mod historical;
pub mod retry;

pub use bybit::BybitClient;
pub use historical::HistoricalPriceSource;
pub use retry::{RetryPolicy, Retryable};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{CandleSeries, Timeframe};

/// Price-history collaborator. Returns oldest-first candles, at most `limit`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FetchError>;
}
