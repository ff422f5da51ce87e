use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{
    Candle, CandleSeries, Direction, IndicatorSnapshot, MacdSignal, RsiStatus, Signal,
    SignalStatus, TakeProfit, Timeframe, Trend, ValidSignal, VolatilityStatus,
};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Candles whose close follows `closes`, each bar spanning half a unit around its open/close.
pub fn candles_from_closes(closes: &[f64]) -> CandleSeries {
    let data: Vec<(f64, f64, f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let o = if i == 0 { c } else { closes[i - 1] };
            (o, o.max(c) + 0.5, o.min(c) - 0.5, c)
        })
        .collect();
    make_candles(&data)
}

/// Create n rising (bullish) candles starting from `start` price.
pub fn make_bullish_trend(n: usize, start: f64) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start + i as f64 * 10.0;
            let close = open + 8.0;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: close + 2.0,
                low: open - 1.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Create n falling (bearish) candles starting from `start` price.
pub fn make_bearish_trend(n: usize, start: f64) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start - i as f64 * 10.0;
            let close = open - 8.0;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: open + 1.0,
                low: close - 2.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// A Config suitable for testing: in-memory friendly, fast retries, quiet logs.
pub fn default_test_config() -> Config {
    let mut cfg = Config::default();
    cfg.database_path = ":memory:".to_string();
    cfg.pipeline.fetch_timeout_ms = 1_000;
    cfg.pipeline.max_retries = 2;
    cfg.pipeline.backoff_base_ms = 1;
    cfg.pipeline.backoff_max_ms = 5;
    cfg.log_level = "ERROR".to_string();
    cfg
}

fn signal(
    pair: &str,
    direction: Direction,
    entry: f64,
    ladder: &[f64],
    raw_text: &str,
) -> ValidSignal {
    let pcts = [40.0, 60.0, 80.0, 100.0];
    let take_profits = ladder
        .iter()
        .zip(pcts.iter().cycle())
        .map(|(&price, &profit_pct)| TakeProfit { price, profit_pct })
        .collect();

    ValidSignal::new_unchecked(Signal {
        id: None,
        pair: pair.to_string(),
        direction,
        leverage: 20,
        entry_price: entry,
        take_profits,
        stop_loss: None,
        status: SignalStatus::Received,
        created_at: base_time(),
        updated_at: base_time(),
        raw_text: raw_text.to_string(),
        analysis_summary: None,
    })
}

/// BTCUSDT short at 50000 with a descending four-rung ladder.
pub fn short_signal() -> ValidSignal {
    signal(
        "BTCUSDT",
        Direction::Short,
        50_000.0,
        &[49_000.0, 48_500.0, 48_000.0, 47_500.0],
        "🔥 #BTC/USDT (Short📉, x20) 🔥",
    )
}

/// BTCUSDT long at 50000 with an ascending four-rung ladder.
pub fn long_signal() -> ValidSignal {
    signal(
        "BTCUSDT",
        Direction::Long,
        50_000.0,
        &[51_000.0, 51_500.0, 52_000.0, 52_500.0],
        "🔥 #BTC/USDT (Long📈, x20) 🔥",
    )
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

/// Bearish trend, negative MACD histogram, neutral RSI.
pub fn bearish_snapshot(tf: Timeframe) -> IndicatorSnapshot {
    snapshot(tf, Trend::Bearish, -15.0)
}

/// Bullish trend, positive MACD histogram, neutral RSI.
pub fn bullish_snapshot(tf: Timeframe) -> IndicatorSnapshot {
    snapshot(tf, Trend::Bullish, 15.0)
}

/// Neutral trend, flat MACD, neutral RSI.
pub fn flat_snapshot(tf: Timeframe) -> IndicatorSnapshot {
    snapshot(tf, Trend::Neutral, 0.0)
}
