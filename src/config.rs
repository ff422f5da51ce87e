use crate::error::ConfigError;
use crate::exchange::RetryPolicy;
use crate::models::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub min_leverage: u32,
    pub max_leverage: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_leverage: 1,
            max_leverage: 20,
        }
    }
}

/// ATR multiplier recorded for each volatility band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityMultipliers {
    pub low: f64,
    pub normal_low: f64,
    pub normal_high: f64,
    pub high: f64,
    pub very_high: f64,
}

impl Default for VolatilityMultipliers {
    fn default() -> Self {
        Self {
            low: 0.8,
            normal_low: 1.0,
            normal_high: 1.3,
            high: 1.7,
            very_high: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    /// Number of recent ATR values the volatility percentiles are taken over.
    pub atr_percentile_window: usize,
    /// ATR above p75 times this factor is "very high" volatility.
    pub atr_extreme_factor: f64,
    pub volatility_multipliers: VolatilityMultipliers,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            ema_short: 10,
            ema_long: 30,
            atr_percentile_window: 30,
            atr_extreme_factor: 1.5,
            volatility_multipliers: VolatilityMultipliers::default(),
        }
    }
}

impl IndicatorConfig {
    /// Bars needed before every indicator (including the MACD crossover,
    /// which compares two histogram values) is defined.
    pub fn min_history(&self) -> usize {
        (self.macd_slow + self.macd_signal)
            .max(self.ema_long)
            .max(self.rsi_period + 1)
            .max(self.atr_period + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceConfig {
    /// Most recent bars searched for swings.
    pub lookback: usize,
    /// A swing is the strict extremum within this many bars on each side.
    pub pivot_radius: usize,
    /// Minimum bar distance between consecutive swings of one kind.
    pub min_swing_distance: usize,
    pub base_confidence: f64,
    /// Added per extra indicator agreeing on the same timeframe and type.
    pub agreement_bonus: f64,
    /// Subtracted when a single weak divergence is all that triggered.
    pub weak_penalty: f64,
    pub min_confidence: f64,
    /// Price move (fraction) that scores 1.0 on the strength scale.
    pub price_reference_pct: f64,
    /// Relative indicator move that scores 1.0 on the strength scale.
    pub indicator_reference_pct: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            lookback: 30,
            pivot_radius: 5,
            min_swing_distance: 5,
            base_confidence: 0.5,
            agreement_bonus: 0.2,
            weak_penalty: 0.15,
            min_confidence: 0.3,
            price_reference_pct: 0.02,
            indicator_reference_pct: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub timeframe_weights: HashMap<Timeframe, f64>,
    pub trend_vote_weight: f64,
    pub macd_vote_weight: f64,
    pub rsi_vote_weight: f64,
    pub divergence_weight: f64,
    pub enter_score: f64,
    pub enter_confidence: f64,
    pub avoid_score: f64,
    pub exit_score: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        let timeframe_weights = HashMap::from([
            (Timeframe::M1, 1.0),
            (Timeframe::M5, 1.5),
            (Timeframe::M15, 2.0),
            (Timeframe::H1, 2.5),
            (Timeframe::H4, 3.0),
            (Timeframe::D1, 3.5),
        ]);

        Self {
            timeframe_weights,
            trend_vote_weight: 0.5,
            macd_vote_weight: 0.3,
            rsi_vote_weight: 0.2,
            divergence_weight: 0.15,
            enter_score: 0.5,
            enter_confidence: 0.65,
            avoid_score: 0.5,
            exit_score: 0.5,
        }
    }
}

impl TrendConfig {
    pub fn weight_for(&self, tf: Timeframe) -> f64 {
        self.timeframe_weights.get(&tf).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub timeframes: Vec<Timeframe>,
    pub history_limit: usize,
    pub workers: usize,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Seconds between sweeps re-running waiting signals; 0 disables them.
    pub reactivation_interval_secs: u64,
    /// How far back a sweep looks for waiting signals.
    pub reactivation_window_hours: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::M1, Timeframe::M5, Timeframe::M15],
            history_limit: 100,
            workers: 4,
            fetch_timeout_ms: 15_000,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            reactivation_interval_secs: 900,
            reactivation_window_hours: 24,
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
            base_backoff: Duration::from_millis(self.backoff_base_ms),
            max_backoff: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn reactivation_interval(&self) -> Option<Duration> {
        (self.reactivation_interval_secs > 0)
            .then(|| Duration::from_secs(self.reactivation_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Exchange
    pub bybit_base_url: String,
    pub bybit_category: String,

    // Storage
    pub database_path: String,

    // Components
    pub parser: ParserConfig,
    pub indicators: IndicatorConfig,
    pub divergence: DivergenceConfig,
    pub trend: TrendConfig,
    pub pipeline: PipelineConfig,

    // Logging
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bybit_base_url: "https://api.bybit.com".to_string(),
            bybit_category: "linear".to_string(),
            database_path: "data/trading_signals.db".to_string(),
            parser: ParserConfig::default(),
            indicators: IndicatorConfig::default(),
            divergence: DivergenceConfig::default(),
            trend: TrendConfig::default(),
            pipeline: PipelineConfig::default(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let mut cfg = Config::default();

        cfg.bybit_base_url = env("BYBIT_BASE_URL", &cfg.bybit_base_url);
        cfg.bybit_category = env("BYBIT_CATEGORY", &cfg.bybit_category);
        cfg.database_path = env("DATABASE_PATH", &cfg.database_path);
        cfg.log_level = env("LOG_LEVEL", &cfg.log_level);

        cfg.parser.min_leverage = env("MIN_LEVERAGE", "1").parse().unwrap_or(1);
        cfg.parser.max_leverage = env("MAX_LEVERAGE", "20").parse().unwrap_or(20);

        cfg.indicators.rsi_overbought = env("RSI_OVERBOUGHT", "70").parse().unwrap_or(70.0);
        cfg.indicators.rsi_oversold = env("RSI_OVERSOLD", "30").parse().unwrap_or(30.0);
        cfg.indicators.atr_period = env("ATR_PERIOD", "14").parse().unwrap_or(14);
        cfg.indicators.atr_extreme_factor =
            env("ATR_EXTREME_FACTOR", "1.5").parse().unwrap_or(1.5);

        cfg.divergence.lookback = env("DIVERGENCE_LOOKBACK", "30").parse().unwrap_or(30);
        cfg.divergence.pivot_radius = env("PIVOT_RADIUS", "5").parse().unwrap_or(5);
        cfg.divergence.min_confidence =
            env("DIVERGENCE_MIN_CONFIDENCE", "0.3").parse().unwrap_or(0.3);

        cfg.trend.enter_confidence = env("ENTER_CONFIDENCE", "0.65").parse().unwrap_or(0.65);
        cfg.trend.enter_score = env("ENTER_SCORE", "0.5").parse().unwrap_or(0.5);
        cfg.trend.avoid_score = env("AVOID_SCORE", "0.5").parse().unwrap_or(0.5);
        cfg.trend.exit_score = env("EXIT_SCORE", "0.5").parse().unwrap_or(0.5);
        if let Ok(raw) = std::env::var("TIMEFRAME_WEIGHTS") {
            // "1m:1.0,5m:1.5,15m:2"
            for pair in raw.split(',') {
                let mut parts = pair.splitn(2, ':');
                let tf = parts.next().and_then(Timeframe::from_str_loose);
                let weight = parts.next().and_then(|w| w.trim().parse::<f64>().ok());
                if let (Some(tf), Some(weight)) = (tf, weight) {
                    cfg.trend.timeframe_weights.insert(tf, weight);
                }
            }
        }

        if let Ok(raw) = std::env::var("TIMEFRAMES") {
            let tfs: Vec<Timeframe> = raw.split(',').filter_map(Timeframe::from_str_loose).collect();
            if !tfs.is_empty() {
                cfg.pipeline.timeframes = tfs;
            }
        }
        cfg.pipeline.history_limit = env("HISTORY_LIMIT", "100").parse().unwrap_or(100);
        cfg.pipeline.workers = env("ANALYSIS_WORKERS", "4").parse().unwrap_or(4);
        cfg.pipeline.fetch_timeout_ms = env("FETCH_TIMEOUT_MS", "15000").parse().unwrap_or(15_000);
        cfg.pipeline.max_retries = env("MAX_RETRIES", "3").parse().unwrap_or(3);
        cfg.pipeline.backoff_base_ms = env("BACKOFF_BASE_MS", "500").parse().unwrap_or(500);
        cfg.pipeline.backoff_max_ms = env("BACKOFF_MAX_MS", "8000").parse().unwrap_or(8_000);
        cfg.pipeline.reactivation_interval_secs =
            env("REACTIVATION_INTERVAL_SECS", "900").parse().unwrap_or(900);
        cfg.pipeline.reactivation_window_hours =
            env("REACTIVATION_WINDOW_HOURS", "24").parse().unwrap_or(24);

        cfg
    }

    /// Range checks only; values are otherwise taken as given.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |field: &'static str, reason: String| Err(ConfigError::OutOfRange { field, reason });

        if self.parser.min_leverage == 0 || self.parser.min_leverage > self.parser.max_leverage {
            return fail(
                "parser.leverage",
                format!(
                    "need 1 <= min ({}) <= max ({})",
                    self.parser.min_leverage, self.parser.max_leverage
                ),
            );
        }

        let ind = &self.indicators;
        if !(0.0..=100.0).contains(&ind.rsi_oversold)
            || !(0.0..=100.0).contains(&ind.rsi_overbought)
            || ind.rsi_oversold >= ind.rsi_overbought
        {
            return fail(
                "indicators.rsi_thresholds",
                format!("need 0 <= oversold ({}) < overbought ({}) <= 100", ind.rsi_oversold, ind.rsi_overbought),
            );
        }
        if [ind.rsi_period, ind.macd_fast, ind.macd_slow, ind.macd_signal, ind.atr_period, ind.ema_short, ind.ema_long]
            .contains(&0)
        {
            return fail("indicators.periods", "all periods must be > 0".to_string());
        }
        if ind.macd_fast >= ind.macd_slow {
            return fail(
                "indicators.macd",
                format!("fast ({}) must be below slow ({})", ind.macd_fast, ind.macd_slow),
            );
        }
        if ind.atr_percentile_window < 4 {
            return fail("indicators.atr_percentile_window", "need at least 4 values".to_string());
        }

        let div = &self.divergence;
        if div.lookback < div.pivot_radius * 2 + 1 {
            return fail(
                "divergence.lookback",
                format!("lookback {} cannot hold a pivot of radius {}", div.lookback, div.pivot_radius),
            );
        }
        for (field, value) in [
            ("divergence.base_confidence", div.base_confidence),
            ("divergence.min_confidence", div.min_confidence),
            ("trend.enter_confidence", self.trend.enter_confidence),
            ("trend.enter_score", self.trend.enter_score),
            ("trend.avoid_score", self.trend.avoid_score),
            ("trend.exit_score", self.trend.exit_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(field, format!("{} not in [0, 1]", value));
            }
        }
        if div.price_reference_pct <= 0.0 || div.indicator_reference_pct <= 0.0 {
            return fail("divergence.reference_pct", "references must be > 0".to_string());
        }
        if self.trend.timeframe_weights.values().any(|w| *w < 0.0) {
            return fail("trend.timeframe_weights", "weights must be >= 0".to_string());
        }

        let pipe = &self.pipeline;
        if pipe.timeframes.is_empty() {
            return fail("pipeline.timeframes", "at least one timeframe".to_string());
        }
        if pipe.workers == 0 {
            return fail("pipeline.workers", "at least one worker".to_string());
        }
        if pipe.reactivation_window_hours <= 0 {
            return fail("pipeline.reactivation_window_hours", "window must be > 0".to_string());
        }
        if pipe.fetch_timeout_ms == 0 {
            return fail("pipeline.fetch_timeout_ms", "timeout must be > 0".to_string());
        }
        if pipe.history_limit < ind.min_history() {
            return fail(
                "pipeline.history_limit",
                format!("{} is below the {} bars indicators need", pipe.history_limit, ind.min_history()),
            );
        }

        Ok(())
    }
}
