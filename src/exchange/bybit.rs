use async_trait::async_trait;
use chrono::DateTime;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::FetchError;
use crate::exchange::PriceSource;
use crate::models::{Candle, CandleSeries, Timeframe};

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
/// Bybit caps `limit` on the kline endpoint.
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineResponse {
    ret_code: i64,
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

/// Public market-data client for Bybit v5 (`/v5/market/kline`).
pub struct BybitClient {
    client: Client,
    base_url: String,
    category: String,
    last_request: Mutex<Option<Instant>>,
    cache: DashMap<String, (Instant, CandleSeries)>,
    cache_ttl: Duration,
}

impl BybitClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.bybit_base_url.trim_end_matches('/').to_string(),
            category: cfg.bybit_category.clone(),
            last_request: Mutex::new(None),
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(5),
        }
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn cached(&self, key: &str) -> Option<CandleSeries> {
        let entry = self.cache.get(key)?;
        let (cached_at, series) = entry.value();
        let fresh = (cached_at.elapsed() < self.cache_ttl).then(|| series.clone());
        fresh
    }

    /// Stores a fresh series and drops every entry past its TTL.
    fn cache_insert(&self, key: String, series: CandleSeries) {
        let ttl = self.cache_ttl;
        self.cache.retain(|_, (cached_at, _)| cached_at.elapsed() < ttl);
        self.cache.insert(key, (Instant::now(), series));
    }
}

/// Decodes a kline body into oldest-first candles. Bybit lists newest first.
pub fn parse_kline_response(body: &str) -> Result<Vec<Candle>, FetchError> {
    let data: KlineResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    if data.ret_code != 0 {
        return Err(FetchError::Api {
            code: data.ret_code,
            message: data.ret_msg,
        });
    }

    let rows = data.result.map(|r| r.list).unwrap_or_default();
    let mut candles = rows
        .iter()
        .map(|row| parse_row(row))
        .collect::<Result<Vec<Candle>, FetchError>>()?;

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// `[startTime, open, high, low, close, volume, turnover]`, all strings.
fn parse_row(row: &[String]) -> Result<Candle, FetchError> {
    if row.len() < 6 {
        return Err(FetchError::Decode(format!("short kline row: {:?}", row)));
    }
    let num = |i: usize| -> Result<f64, FetchError> {
        row[i]
            .parse::<f64>()
            .map_err(|_| FetchError::Decode(format!("bad number {:?} in kline row", row[i])))
    };

    let ms: i64 = row[0]
        .parse()
        .map_err(|_| FetchError::Decode(format!("bad start time {:?}", row[0])))?;
    let timestamp = DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| FetchError::Decode(format!("start time out of range: {}", ms)))?;

    Ok(Candle {
        timestamp,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}

#[async_trait]
impl PriceSource for BybitClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        let limit = limit.clamp(1, MAX_LIMIT);

        let cache_key = format!("{}_{}_{}", symbol, tf, limit);
        if let Some(series) = self.cached(&cache_key) {
            return Ok(series);
        }

        self.rate_limit().await;

        let limit_param = limit.to_string();
        let resp = self
            .client
            .get(format!("{}/v5/market/kline", self.base_url))
            .query(&[
                ("category", self.category.as_str()),
                ("symbol", symbol),
                ("interval", tf.bybit_interval()),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FetchError::Api {
                code: status.as_u16() as i64,
                message: body,
            });
        }

        let candles = parse_kline_response(&body)?;
        if candles.is_empty() {
            return Err(FetchError::Unavailable {
                symbol: symbol.to_string(),
                timeframe: tf,
            });
        }
        debug!("Fetched {} {} candles for {}", candles.len(), tf, symbol);

        let series = CandleSeries::new(candles);
        self.cache_insert(cache_key, series.clone());

        Ok(series)
    }
}
