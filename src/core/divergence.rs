use std::collections::BTreeMap;
use tracing::trace;

use crate::config::DivergenceConfig;
use crate::core::engine::IndicatorSeries;
use crate::core::swings::{find_pivots, find_price_pivots, nearest_pivot, Pivot};
use crate::models::{
    CandleSeries, Divergence, DivergenceStrength, DivergenceType, IndicatorKind,
    IndicatorSnapshot, SwingType, ValidSignal,
};

/// A matched pair of swings on price and on one indicator.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    divergence_type: DivergenceType,
    indicator: IndicatorKind,
    strength: DivergenceStrength,
    price: (Pivot, Pivot),
    indicator_swings: (Pivot, Pivot),
}

/// Compares the last two price swings against the matching RSI and MACD
/// histogram swings. Stateless: the same inputs always give the same output.
#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    cfg: DivergenceConfig,
}

impl DivergenceDetector {
    pub fn new(cfg: &DivergenceConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn detect(
        &self,
        signal: &ValidSignal,
        snapshot: &IndicatorSnapshot,
        candles: &CandleSeries,
        series: &IndicatorSeries,
    ) -> Vec<Divergence> {
        let Some(last) = candles.last() else {
            return Vec::new();
        };
        let start = candles.len().saturating_sub(self.cfg.lookback);

        let highs = candles.highs();
        let lows = candles.lows();
        let price_highs = find_price_pivots(
            &highs[start..],
            self.cfg.pivot_radius,
            SwingType::High,
            self.cfg.min_swing_distance,
        );
        let price_lows = find_price_pivots(
            &lows[start..],
            self.cfg.pivot_radius,
            SwingType::Low,
            self.cfg.min_swing_distance,
        );

        let mut candidates = Vec::new();
        for (indicator, values) in [
            (IndicatorKind::Rsi, &series.rsi),
            (IndicatorKind::Macd, &series.macd.histogram),
        ] {
            let Some(window) = values.get(start..candles.len()) else {
                continue;
            };
            for (kind, price_pivots) in [(SwingType::Low, &price_lows), (SwingType::High, &price_highs)] {
                let ind_pivots =
                    find_pivots(window, self.cfg.pivot_radius, kind, self.cfg.min_swing_distance);
                if let Some(c) = self.classify(indicator, kind, price_pivots, &ind_pivots) {
                    candidates.push(c);
                }
            }
        }

        // Agreement is counted per divergence type across indicators.
        let total = candidates.len();
        let mut best: BTreeMap<(DivergenceType, IndicatorKind), Divergence> = BTreeMap::new();
        for c in &candidates {
            let agreeing = candidates
                .iter()
                .filter(|o| o.divergence_type == c.divergence_type && o.indicator != c.indicator)
                .count();

            let mut confidence = self.cfg.base_confidence + self.cfg.agreement_bonus * agreeing as f64;
            if total == 1 && c.strength == DivergenceStrength::Weak {
                confidence -= self.cfg.weak_penalty;
            }
            let confidence = confidence.clamp(0.0, 1.0);

            if confidence < self.cfg.min_confidence {
                trace!(
                    "{} {}: dropping {} {} at confidence {:.2}",
                    signal.pair, snapshot.timeframe, c.indicator, c.divergence_type, confidence
                );
                continue;
            }

            let (p1, p2) = c.price;
            let (i1, i2) = c.indicator_swings;
            let divergence = Divergence {
                divergence_type: c.divergence_type,
                indicator: c.indicator,
                timeframe: snapshot.timeframe,
                strength: c.strength,
                confidence,
                price_swing_low: p1.value.min(p2.value),
                price_swing_high: p1.value.max(p2.value),
                indicator_swing_low: i1.value.min(i2.value),
                indicator_swing_high: i1.value.max(i2.value),
                detected_at: last.timestamp,
            };

            let key = (c.divergence_type, c.indicator);
            if best.get(&key).map_or(true, |existing| existing.confidence < confidence) {
                best.insert(key, divergence);
            }
        }

        let mut out: Vec<Divergence> = best.into_values().collect();
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.divergence_type.cmp(&b.divergence_type))
                .then(a.indicator.cmp(&b.indicator))
        });
        out
    }

    fn classify(
        &self,
        indicator: IndicatorKind,
        kind: SwingType,
        price_pivots: &[Pivot],
        ind_pivots: &[Pivot],
    ) -> Option<Candidate> {
        let [.., p1, p2] = price_pivots else {
            return None;
        };
        let i1 = nearest_pivot(ind_pivots, p1.index, self.cfg.pivot_radius)?;
        let i2 = nearest_pivot(ind_pivots, p2.index, self.cfg.pivot_radius)?;
        if i1.index >= i2.index {
            return None;
        }

        let price_up = p2.value > p1.value;
        let price_down = p2.value < p1.value;
        let ind_up = i2.value > i1.value;
        let ind_down = i2.value < i1.value;

        let divergence_type = match kind {
            SwingType::Low if price_down && ind_up => DivergenceType::RegularBullish,
            SwingType::Low if price_up && ind_down => DivergenceType::HiddenBullish,
            SwingType::High if price_up && ind_down => DivergenceType::RegularBearish,
            SwingType::High if price_down && ind_up => DivergenceType::HiddenBearish,
            _ => return None,
        };

        let strength = self.strength(p1.value, p2.value, i1.value, i2.value)?;

        Some(Candidate {
            divergence_type,
            indicator,
            strength,
            price: (*p1, *p2),
            indicator_swings: (i1, i2),
        })
    }

    /// Average of the price and indicator swing deltas, each normalized by
    /// its reference move and capped at 2.
    fn strength(&self, p1: f64, p2: f64, i1: f64, i2: f64) -> Option<DivergenceStrength> {
        if p1 == 0.0 {
            return None;
        }
        let price_pct = ((p2 - p1) / p1).abs();
        let scale = i1.abs().max(i2.abs());
        if scale == 0.0 {
            return None;
        }
        let ind_pct = (i2 - i1).abs() / scale;

        let score = ((price_pct / self.cfg.price_reference_pct).min(2.0)
            + (ind_pct / self.cfg.indicator_reference_pct).min(2.0))
            / 2.0;

        Some(if score >= 1.5 {
            DivergenceStrength::Strong
        } else if score >= 1.0 {
            DivergenceStrength::Moderate
        } else {
            DivergenceStrength::Weak
        })
    }
}
