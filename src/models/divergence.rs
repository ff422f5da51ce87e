use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Direction, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceType {
    RegularBullish,
    RegularBearish,
    HiddenBullish,
    HiddenBearish,
}

impl DivergenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceType::RegularBullish => "regular_bullish",
            DivergenceType::RegularBearish => "regular_bearish",
            DivergenceType::HiddenBullish => "hidden_bullish",
            DivergenceType::HiddenBearish => "hidden_bearish",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<DivergenceType> {
        match s {
            "regular_bullish" => Some(DivergenceType::RegularBullish),
            "regular_bearish" => Some(DivergenceType::RegularBearish),
            "hidden_bullish" => Some(DivergenceType::HiddenBullish),
            "hidden_bearish" => Some(DivergenceType::HiddenBearish),
            _ => None,
        }
    }

    /// The direction this divergence argues for.
    pub fn direction(self) -> Direction {
        match self {
            DivergenceType::RegularBullish | DivergenceType::HiddenBullish => Direction::Long,
            DivergenceType::RegularBearish | DivergenceType::HiddenBearish => Direction::Short,
        }
    }
}

impl fmt::Display for DivergenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorKind {
    Rsi,
    Macd,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Macd => "MACD",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<IndicatorKind> {
        match s.to_ascii_uppercase().as_str() {
            "RSI" => Some(IndicatorKind::Rsi),
            "MACD" => Some(IndicatorKind::Macd),
            _ => None,
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceStrength {
    Weak,
    Moderate,
    Strong,
}

impl DivergenceStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceStrength::Weak => "weak",
            DivergenceStrength::Moderate => "moderate",
            DivergenceStrength::Strong => "strong",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<DivergenceStrength> {
        match s {
            "weak" => Some(DivergenceStrength::Weak),
            "moderate" => Some(DivergenceStrength::Moderate),
            "strong" => Some(DivergenceStrength::Strong),
            _ => None,
        }
    }

    /// Weight applied when a divergence moves a recommendation's confidence.
    pub fn factor(self) -> f64 {
        match self {
            DivergenceStrength::Weak => 0.5,
            DivergenceStrength::Moderate => 0.75,
            DivergenceStrength::Strong => 1.0,
        }
    }
}

impl fmt::Display for DivergenceStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price vs indicator swing mismatch on one timeframe. Swing pairs are
/// stored ordered, so `*_swing_low < *_swing_high` on both axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub divergence_type: DivergenceType,
    pub indicator: IndicatorKind,
    pub timeframe: Timeframe,
    pub strength: DivergenceStrength,
    pub confidence: f64,
    pub price_swing_low: f64,
    pub price_swing_high: f64,
    pub indicator_swing_low: f64,
    pub indicator_swing_high: f64,
    pub detected_at: DateTime<Utc>,
}

impl Divergence {
    pub fn direction(&self) -> Direction {
        self.divergence_type.direction()
    }
}
