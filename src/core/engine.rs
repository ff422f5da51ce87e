use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IndicatorConfig;
use crate::core::indicators::{self, MacdSeries};
use crate::error::AnalysisError;
use crate::models::{
    CandleSeries, IndicatorSnapshot, MacdSignal, RsiStatus, Timeframe, Trend, VolatilityStatus,
};

/// Full indicator series for one candle history, aligned bar for bar.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub rsi: Vec<Option<f64>>,
    pub macd: MacdSeries,
    pub atr: Vec<Option<f64>>,
    pub ema_short: Vec<Option<f64>>,
    pub ema_long: Vec<Option<f64>>,
}

/// Cross-timeframe summary of a set of snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedView {
    pub predominant_trend: Trend,
    /// Share of snapshots agreeing with the predominant trend, in [0, 1].
    pub trend_consistency: f64,
    pub average_rsi: f64,
    pub max_atr_multiplier: f64,
    pub timeframes: usize,
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    cfg: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(cfg: &IndicatorConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn min_history(&self) -> usize {
        self.cfg.min_history()
    }

    pub fn series(&self, candles: &CandleSeries) -> Result<IndicatorSeries, AnalysisError> {
        let required = self.min_history();
        if candles.len() < required || !candles.is_finite() {
            return Err(AnalysisError::DataUnavailable {
                required,
                available: candles.len(),
            });
        }

        let closes = candles.closes();
        Ok(IndicatorSeries {
            rsi: indicators::rsi(&closes, self.cfg.rsi_period),
            macd: indicators::macd(
                &closes,
                self.cfg.macd_fast,
                self.cfg.macd_slow,
                self.cfg.macd_signal,
            ),
            atr: indicators::atr(candles.as_slice(), self.cfg.atr_period),
            ema_short: indicators::ema(&closes, self.cfg.ema_short),
            ema_long: indicators::ema(&closes, self.cfg.ema_long),
        })
    }

    /// Snapshot of `candles` as of its last bar.
    pub fn analyze(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &CandleSeries,
    ) -> Result<IndicatorSnapshot, AnalysisError> {
        let series = self.series(candles)?;
        let snapshot = self.snapshot_from(timeframe, candles, &series)?;
        debug!(
            "{} {}: trend={} rsi={:.1} macd={} atr={}",
            symbol, timeframe, snapshot.trend, snapshot.rsi, snapshot.macd_signal, snapshot.atr_status
        );
        Ok(snapshot)
    }

    /// Builds a snapshot from series already computed for `candles`.
    pub fn snapshot_from(
        &self,
        timeframe: Timeframe,
        candles: &CandleSeries,
        series: &IndicatorSeries,
    ) -> Result<IndicatorSnapshot, AnalysisError> {
        let unavailable = || AnalysisError::DataUnavailable {
            required: self.min_history(),
            available: candles.len(),
        };

        let last = candles.last().ok_or_else(unavailable)?;
        let n = candles.len();

        let rsi = indicators::last_defined(&series.rsi).ok_or_else(unavailable)?;
        let macd_line = indicators::last_defined(&series.macd.line).ok_or_else(unavailable)?;
        let macd_signal_line =
            indicators::last_defined(&series.macd.signal).ok_or_else(unavailable)?;

        let hist = &series.macd.histogram;
        let prev = n.checked_sub(2).and_then(|i| hist.get(i).copied().flatten());
        let current = n.checked_sub(1).and_then(|i| hist.get(i).copied().flatten());
        let (Some(prev_hist), Some(macd_histogram)) = (prev, current) else {
            return Err(unavailable());
        };

        let atr = indicators::last_defined(&series.atr).ok_or_else(unavailable)?;
        let (atr_status, atr_multiplier) = self.volatility(&series.atr, atr);

        Ok(IndicatorSnapshot {
            timeframe,
            trend: self.trend(series),
            rsi,
            rsi_status: self.rsi_status(rsi),
            macd_line,
            macd_signal_line,
            macd_histogram,
            macd_signal: crossover(prev_hist, macd_histogram),
            atr,
            atr_status,
            atr_multiplier,
            close_price: last.close,
            analysis_timestamp: last.timestamp,
        })
    }

    pub fn rsi_status(&self, rsi: f64) -> RsiStatus {
        if rsi > self.cfg.rsi_overbought {
            RsiStatus::Overbought
        } else if rsi < self.cfg.rsi_oversold {
            RsiStatus::Oversold
        } else {
            RsiStatus::Neutral
        }
    }

    fn trend(&self, series: &IndicatorSeries) -> Trend {
        let short = indicators::last_defined(&series.ema_short);
        let long = indicators::last_defined(&series.ema_long);
        match (short, long) {
            (Some(s), Some(l)) if s > l => Trend::Bullish,
            (Some(s), Some(l)) if s < l => Trend::Bearish,
            _ => Trend::Neutral,
        }
    }

    /// Places the current ATR in the percentile bands of the recent ATR window.
    fn volatility(&self, atr_series: &[Option<f64>], current: f64) -> (VolatilityStatus, f64) {
        let m = &self.cfg.volatility_multipliers;

        let mut window: Vec<f64> = atr_series.iter().flatten().copied().collect();
        let start = window.len().saturating_sub(self.cfg.atr_percentile_window);
        let mut window = window.split_off(start);
        window.sort_by(f64::total_cmp);

        let (Some(p25), Some(p50), Some(p75)) = (
            indicators::percentile(&window, 0.25),
            indicators::percentile(&window, 0.50),
            indicators::percentile(&window, 0.75),
        ) else {
            return (VolatilityStatus::NormalLow, m.normal_low);
        };

        if current > p75 * self.cfg.atr_extreme_factor {
            (VolatilityStatus::VeryHigh, m.very_high)
        } else if current > p75 {
            (VolatilityStatus::High, m.high)
        } else if current > p50 {
            (VolatilityStatus::NormalHigh, m.normal_high)
        } else if current > p25 {
            (VolatilityStatus::NormalLow, m.normal_low)
        } else {
            (VolatilityStatus::Low, m.low)
        }
    }

    /// Summary across timeframes. `None` for an empty set.
    pub fn consolidate(snapshots: &[IndicatorSnapshot]) -> Option<ConsolidatedView> {
        if snapshots.is_empty() {
            return None;
        }

        let count = |t: Trend| snapshots.iter().filter(|s| s.trend == t).count();
        let (bull, bear, neutral) = (count(Trend::Bullish), count(Trend::Bearish), count(Trend::Neutral));
        let (predominant_trend, agreeing) = if bull > bear && bull >= neutral {
            (Trend::Bullish, bull)
        } else if bear > bull && bear >= neutral {
            (Trend::Bearish, bear)
        } else {
            (Trend::Neutral, neutral)
        };

        let total = snapshots.len() as f64;
        Some(ConsolidatedView {
            predominant_trend,
            trend_consistency: agreeing as f64 / total,
            average_rsi: snapshots.iter().map(|s| s.rsi).sum::<f64>() / total,
            max_atr_multiplier: snapshots
                .iter()
                .map(|s| s.atr_multiplier)
                .fold(f64::MIN, f64::max),
            timeframes: snapshots.len(),
        })
    }
}

fn crossover(prev: f64, current: f64) -> MacdSignal {
    if prev < 0.0 && current >= 0.0 {
        MacdSignal::Bullish
    } else if prev >= 0.0 && current < 0.0 {
        MacdSignal::Bearish
    } else {
        MacdSignal::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        bearish_snapshot, bullish_snapshot, candles_from_closes, make_bearish_trend,
        make_bullish_trend, make_candles,
    };

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(&IndicatorConfig::default())
    }

    #[test]
    fn short_history_is_data_unavailable() {
        let candles = make_bullish_trend(20, 100.0);
        let err = engine().analyze("BTCUSDT", Timeframe::M5, &candles).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::DataUnavailable {
                required: 35,
                available: 20
            }
        );
    }

    #[test]
    fn non_finite_prices_are_data_unavailable() {
        let mut closes = vec![100.0; 50];
        closes[10] = f64::NAN;
        let candles = candles_from_closes(&closes);
        assert!(engine().series(&candles).is_err());
    }

    #[test]
    fn minimum_history_is_enough() {
        let candles = make_bullish_trend(35, 100.0);
        assert!(engine().analyze("BTCUSDT", Timeframe::M1, &candles).is_ok());
    }

    #[test]
    fn bullish_trend_snapshot() {
        let candles = make_bullish_trend(80, 1000.0);
        let snap = engine().analyze("BTCUSDT", Timeframe::M15, &candles).unwrap();
        assert_eq!(snap.timeframe, Timeframe::M15);
        assert_eq!(snap.trend, Trend::Bullish);
        assert_eq!(snap.rsi_status, RsiStatus::Overbought);
        assert!(snap.macd_line > 0.0);
        assert_eq!(snap.close_price, candles.last().unwrap().close);
        assert_eq!(snap.analysis_timestamp, candles.last().unwrap().timestamp);
    }

    #[test]
    fn bearish_trend_snapshot() {
        let candles = make_bearish_trend(80, 5000.0);
        let snap = engine().analyze("BTCUSDT", Timeframe::H1, &candles).unwrap();
        assert_eq!(snap.trend, Trend::Bearish);
        assert_eq!(snap.rsi_status, RsiStatus::Oversold);
        assert!(snap.macd_line < 0.0);
    }

    #[test]
    fn identical_input_gives_identical_snapshot() {
        let candles = make_bullish_trend(60, 1000.0);
        let e = engine();
        let a = e.analyze("X", Timeframe::M5, &candles).unwrap();
        let b = e.analyze("X", Timeframe::M5, &candles).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rsi.to_bits(), b.rsi.to_bits());
        assert_eq!(a.atr.to_bits(), b.atr.to_bits());
    }

    #[test]
    fn macd_crossover_classification() {
        assert_eq!(crossover(-0.5, 0.0), MacdSignal::Bullish);
        assert_eq!(crossover(0.2, -0.1), MacdSignal::Bearish);
        assert_eq!(crossover(0.2, 0.3), MacdSignal::Neutral);
        assert_eq!(crossover(-0.2, -0.3), MacdSignal::Neutral);
    }

    #[test]
    fn volatility_spike_is_very_high() {
        // Quiet tape then one huge bar
        let mut data: Vec<(f64, f64, f64, f64)> = (0..59).map(|_| (100.0, 100.5, 99.5, 100.0)).collect();
        data.push((100.0, 130.0, 90.0, 120.0));
        let candles = make_candles(&data);
        let snap = engine().analyze("X", Timeframe::M1, &candles).unwrap();
        assert_eq!(snap.atr_status, VolatilityStatus::VeryHigh);
        assert_eq!(snap.atr_multiplier, 2.0);
    }

    #[test]
    fn quiet_after_noise_is_low_volatility() {
        let mut data: Vec<(f64, f64, f64, f64)> = (0..40).map(|_| (100.0, 105.0, 95.0, 100.0)).collect();
        data.extend((0..20).map(|_| (100.0, 100.1, 99.9, 100.0)));
        let snap = engine().analyze("X", Timeframe::M1, &make_candles(&data)).unwrap();
        assert_eq!(snap.atr_status, VolatilityStatus::Low);
        assert_eq!(snap.atr_multiplier, 0.8);
    }

    #[test]
    fn rsi_thresholds_are_configurable() {
        let mut cfg = IndicatorConfig::default();
        cfg.rsi_overbought = 60.0;
        cfg.rsi_oversold = 40.0;
        let e = IndicatorEngine::new(&cfg);
        assert_eq!(e.rsi_status(65.0), RsiStatus::Overbought);
        assert_eq!(e.rsi_status(35.0), RsiStatus::Oversold);
        assert_eq!(e.rsi_status(50.0), RsiStatus::Neutral);
    }

    #[test]
    fn consolidated_view() {
        assert!(IndicatorEngine::consolidate(&[]).is_none());

        let mut high_vol = bearish_snapshot(Timeframe::M15);
        high_vol.atr_multiplier = 1.7;
        let snaps = vec![
            bearish_snapshot(Timeframe::M1),
            bearish_snapshot(Timeframe::M5),
            high_vol,
            bullish_snapshot(Timeframe::H1),
        ];
        let view = IndicatorEngine::consolidate(&snaps).unwrap();
        assert_eq!(view.predominant_trend, Trend::Bearish);
        assert_eq!(view.trend_consistency, 0.75);
        assert_eq!(view.max_atr_multiplier, 1.7);
        assert_eq!(view.average_rsi, 50.0);
        assert_eq!(view.timeframes, 4);
    }
}
