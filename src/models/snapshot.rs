use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Timeframe, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiStatus {
    Overbought,
    Oversold,
    Neutral,
}

impl RsiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RsiStatus::Overbought => "overbought",
            RsiStatus::Oversold => "oversold",
            RsiStatus::Neutral => "neutral",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<RsiStatus> {
        match s {
            "overbought" => Some(RsiStatus::Overbought),
            "oversold" => Some(RsiStatus::Oversold),
            "neutral" => Some(RsiStatus::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for RsiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// MACD crossover on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdSignal {
    /// Histogram went from negative to non-negative.
    Bullish,
    /// Histogram went from non-negative to negative.
    Bearish,
    /// No crossover; the histogram holds its side.
    Neutral,
}

impl MacdSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacdSignal::Bullish => "bullish",
            MacdSignal::Bearish => "bearish",
            MacdSignal::Neutral => "neutral",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<MacdSignal> {
        match s {
            "bullish" => Some(MacdSignal::Bullish),
            "bearish" => Some(MacdSignal::Bearish),
            "neutral" => Some(MacdSignal::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for MacdSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityStatus {
    Low,
    NormalLow,
    NormalHigh,
    High,
    VeryHigh,
}

impl VolatilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityStatus::Low => "low",
            VolatilityStatus::NormalLow => "normal_low",
            VolatilityStatus::NormalHigh => "normal_high",
            VolatilityStatus::High => "high",
            VolatilityStatus::VeryHigh => "very_high",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<VolatilityStatus> {
        match s {
            "low" => Some(VolatilityStatus::Low),
            "normal_low" => Some(VolatilityStatus::NormalLow),
            "normal_high" => Some(VolatilityStatus::NormalHigh),
            "high" => Some(VolatilityStatus::High),
            "very_high" => Some(VolatilityStatus::VeryHigh),
            _ => None,
        }
    }
}

impl fmt::Display for VolatilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timeframe's indicator reading, taken at the last candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timeframe: Timeframe,
    pub trend: Trend,
    pub rsi: f64,
    pub rsi_status: RsiStatus,
    pub macd_line: f64,
    pub macd_signal_line: f64,
    pub macd_histogram: f64,
    pub macd_signal: MacdSignal,
    pub atr: f64,
    pub atr_status: VolatilityStatus,
    pub atr_multiplier: f64,
    pub close_price: f64,
    pub analysis_timestamp: DateTime<Utc>,
}
