use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::FetchError;
use crate::exchange::PriceSource;
use crate::models::{Candle, CandleSeries, Timeframe};

/// A PriceSource that replays pre-loaded candles.
/// A cursor controls which candles are visible: only candles with
/// timestamp <= cursor are returned, simulating a forward walk.
pub struct HistoricalPriceSource {
    data: HashMap<(String, Timeframe), CandleSeries>,
    /// Unix millis; `i64::MAX` shows everything.
    cursor: AtomicI64,
}

impl Default for HistoricalPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalPriceSource {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            cursor: AtomicI64::new(i64::MAX),
        }
    }

    /// Load candles for a symbol and timeframe; sorted oldest-first on insert.
    pub fn load(&mut self, symbol: &str, tf: Timeframe, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        self.data
            .insert((symbol.to_ascii_uppercase(), tf), CandleSeries::new(candles));
    }

    /// Load a JSON array of candles as written by `serde_json`.
    pub fn load_file(
        &mut self,
        symbol: &str,
        tf: Timeframe,
        path: &Path,
    ) -> Result<usize, FetchError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Decode(format!("{}: {}", path.display(), e)))?;
        let candles: Vec<Candle> = serde_json::from_str(&raw)
            .map_err(|e| FetchError::Decode(format!("{}: {}", path.display(), e)))?;
        let n = candles.len();
        self.load(symbol, tf, candles);
        Ok(n)
    }

    /// Move the replay clock.
    pub fn set_time(&self, t: DateTime<Utc>) {
        self.cursor.store(t.timestamp_millis(), Ordering::SeqCst);
    }

    /// Make every loaded candle visible again.
    pub fn clear_time(&self) {
        self.cursor.store(i64::MAX, Ordering::SeqCst);
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        match self.cursor.load(Ordering::SeqCst) {
            i64::MAX => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Earliest timestamp across all loaded series.
    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|s| s.first().map(|c| c.timestamp))
            .min()
    }

    /// Latest timestamp across all loaded series.
    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|s| s.last().map(|c| c.timestamp))
            .max()
    }

    fn visible_candles(&self, symbol: &str, tf: Timeframe, limit: usize) -> Option<CandleSeries> {
        let all = self.data.get(&(symbol.to_ascii_uppercase(), tf))?;
        let visible = match self.current_time() {
            Some(now) => all.up_to(now, limit),
            None => all.tail(limit),
        };
        (!visible.is_empty()).then_some(visible)
    }
}

#[async_trait]
impl PriceSource for HistoricalPriceSource {
    async fn fetch_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        self.visible_candles(symbol, tf, limit)
            .ok_or_else(|| FetchError::Unavailable {
                symbol: symbol.to_string(),
                timeframe: tf,
            })
    }
}
