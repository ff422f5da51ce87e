#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

use signal_engine::config::Config;
use signal_engine::error::{FetchError, NotifyError};
use signal_engine::exchange::PriceSource;
use signal_engine::models::{
    Action, Candle, CandleSeries, Divergence, IndicatorSnapshot, MacdSignal, Recommendation,
    RsiStatus, Signal, Timeframe, Trend, VolatilityStatus,
};
use signal_engine::notify::Notifier;

pub const UB_LONG: &str = "🔥 #UB/USDT (Long📈, x20) 🔥\n\
    Entry - 0.04869\n\
    Take-Profit:\n\
    🥉 0.04966 (40% of profit)\n\
    🥈 0.05015 (60% of profit)\n\
    🥇 0.05063 (80% of profit)\n\
    🚀 0.05112 (100% of profit)";

pub const FOUR_SHORT: &str = "🔥 #4/USDT (Short📉, x20) 🔥\n\
    Entry - 0.0854\n\
    Take-Profit:\n\
    🥉 0.08369 (40% of profit)\n\
    🥈 0.08284 (60% of profit)\n\
    🥇 0.08198 (80% of profit)\n\
    🚀 0.08113 (100% of profit)";

pub const BTC_SHORT: &str = "🔥 #BTC/USDT (Short📉, x20) 🔥\n\
    Entry - 50000\n\
    Take-Profit:\n\
    🥉 49000 (40% of profit)\n\
    🥈 48500 (60% of profit)\n\
    🥇 48000 (80% of profit)\n\
    🚀 47500 (100% of profit)";

pub const ETH_LONG: &str = "🔥 #ETH/USDT (Long📈, x10) 🔥\n\
    Entry - 2500\n\
    Take-Profit:\n\
    🥉 2550 (40% of profit)\n\
    🥈 2600 (60% of profit)\n\
    🥇 2650 (80% of profit)\n\
    🚀 2700 (100% of profit)";

/// Numbered ladder without percentages, plus a stop loss.
pub const GIGGLE_LONG: &str = "#GIGGLE/USDT (Long📈, x20)\n\
    Entry - 259.49\n\
    TP1 - 264.67\n\
    TP2 - 269.00\n\
    SL - 250.00";

/// Leverage above the default ceiling.
pub const BTC_OVERLEVERAGED: &str = "🔥 #BTC/USDT (Short📉, x75) 🔥\n\
    Entry - 50000\n\
    Take-Profit:\n\
    🥉 49000 (40% of profit)\n\
    🥈 48500 (60% of profit)";

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Fast retries, short timeouts, quiet logs.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.database_path = ":memory:".to_string();
    cfg.pipeline.fetch_timeout_ms = 1_000;
    cfg.pipeline.max_retries = 2;
    cfg.pipeline.backoff_base_ms = 1;
    cfg.pipeline.backoff_max_ms = 5;
    cfg.log_level = "ERROR".to_string();
    cfg
}

/// Waves of 14 bars: 8 bars with the trend, 6 smaller bars against it, so
/// the series has swings as well as a net drift. `step < 0` drifts down.
pub fn make_wave_trend(count: usize, interval: Duration, start: f64, step: f64) -> CandleSeries {
    let base = base_time();
    let candles: Vec<Candle> = (0..count)
        .map(|i| {
            let wave = i / 14;
            let pos = i % 14;
            let wave_base = start + wave as f64 * step * 3.2;

            let price = if pos < 8 {
                wave_base + pos as f64 * step
            } else {
                wave_base + 8.0 * step - (pos - 8) as f64 * step * 0.8
            };
            let close = price + step * 0.2;

            Candle {
                timestamp: base + interval * i as i32,
                open: price,
                high: price.max(close) + step.abs() * 0.5,
                low: price.min(close) - step.abs() * 0.3,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Serves fixed candles per (symbol, timeframe). Can fail the first few
/// calls per timeframe and delay every call.
#[derive(Default)]
pub struct MockPriceSource {
    data: HashMap<(String, Timeframe), CandleSeries>,
    failures: HashMap<Timeframe, u32>,
    calls: DashMap<Timeframe, AtomicU32>,
    delay: std::time::Duration,
    offline: AtomicBool,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, tf: Timeframe, series: CandleSeries) -> Self {
        self.data.insert((symbol.to_string(), tf), series);
        self
    }

    /// Drifting down on 1m/5m/15m.
    pub fn bearish(self, symbol: &str, start: f64) -> Self {
        self.with_series(symbol, Timeframe::M1, make_wave_trend(100, Duration::minutes(1), start, -10.0))
            .with_series(symbol, Timeframe::M5, make_wave_trend(100, Duration::minutes(5), start, -25.0))
            .with_series(symbol, Timeframe::M15, make_wave_trend(100, Duration::minutes(15), start, -40.0))
    }

    /// Drifting up on 1m/5m/15m.
    pub fn bullish(self, symbol: &str, start: f64) -> Self {
        self.with_series(symbol, Timeframe::M1, make_wave_trend(100, Duration::minutes(1), start, 1.0))
            .with_series(symbol, Timeframe::M5, make_wave_trend(100, Duration::minutes(5), start, 2.5))
            .with_series(symbol, Timeframe::M15, make_wave_trend(100, Duration::minutes(15), start, 4.0))
    }

    /// The first `n` calls for `tf` fail with a retryable API error.
    pub fn failing_first(mut self, tf: Timeframe, n: u32) -> Self {
        self.failures.insert(tf, n);
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// While offline every symbol is unavailable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self, tf: Timeframe) -> u32 {
        self.calls
            .get(&tf)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn fetch_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        let n = self
            .calls
            .entry(tf)
            .or_default()
            .fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable {
                symbol: symbol.to_string(),
                timeframe: tf,
            });
        }
        if n < self.failures.get(&tf).copied().unwrap_or(0) {
            return Err(FetchError::Api {
                code: 10006,
                message: "Too many visits!".to_string(),
            });
        }

        self.data
            .get(&(symbol.to_string(), tf))
            .map(|s| s.tail(limit))
            .ok_or_else(|| FetchError::Unavailable {
                symbol: symbol.to_string(),
                timeframe: tf,
            })
    }
}

/// Keeps every (signal id, action) it is told about.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, Action)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        signal: &Signal,
        recommendation: &Recommendation,
        _divergences: &[Divergence],
    ) -> Result<(), NotifyError> {
        let id = signal.id.unwrap_or_default();
        self.sent.lock().await.push((id, recommendation.action));
        Ok(())
    }
}

fn snapshot(tf: Timeframe, trend: Trend, histogram: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        timeframe: tf,
        trend,
        rsi: 50.0,
        rsi_status: RsiStatus::Neutral,
        macd_line: histogram * 2.0,
        macd_signal_line: histogram,
        macd_histogram: histogram,
        macd_signal: MacdSignal::Neutral,
        atr: 120.0,
        atr_status: VolatilityStatus::NormalLow,
        atr_multiplier: 1.0,
        close_price: 50_000.0,
        analysis_timestamp: base_time(),
    }
}

pub fn bearish_snapshot(tf: Timeframe) -> IndicatorSnapshot {
    snapshot(tf, Trend::Bearish, -15.0)
}

pub fn bullish_snapshot(tf: Timeframe) -> IndicatorSnapshot {
    snapshot(tf, Trend::Bullish, 15.0)
}
