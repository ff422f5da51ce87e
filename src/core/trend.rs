use std::fmt::Write as _;

use crate::config::TrendConfig;
use crate::core::engine::IndicatorEngine;
use crate::models::{
    Action, Divergence, IndicatorSnapshot, MacdSignal, Recommendation, RsiStatus, SignalStatus,
    ValidSignal,
};

/// Folds snapshots and divergences into a recommendation for one signal.
/// Pure: no I/O and no state between calls.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    cfg: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(cfg: &TrendConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Directional vote of one snapshot in [-1, 1]; positive is bullish.
    pub fn vote(&self, snap: &IndicatorSnapshot) -> f64 {
        let macd = match snap.macd_signal {
            MacdSignal::Bullish => 1.0,
            MacdSignal::Bearish => -1.0,
            MacdSignal::Neutral if snap.macd_histogram > 0.0 => 1.0,
            MacdSignal::Neutral if snap.macd_histogram < 0.0 => -1.0,
            MacdSignal::Neutral => 0.0,
        };
        let rsi = match snap.rsi_status {
            RsiStatus::Overbought => -1.0,
            RsiStatus::Oversold => 1.0,
            RsiStatus::Neutral => 0.0,
        };

        let total = self.cfg.trend_vote_weight + self.cfg.macd_vote_weight + self.cfg.rsi_vote_weight;
        if total <= 0.0 {
            return 0.0;
        }
        (snap.trend.score() * self.cfg.trend_vote_weight
            + macd * self.cfg.macd_vote_weight
            + rsi * self.cfg.rsi_vote_weight)
            / total
    }

    /// Timeframe-weighted net score in [-1, 1].
    pub fn net_score(&self, snapshots: &[&IndicatorSnapshot]) -> f64 {
        let (sum, weights) = snapshots.iter().fold((0.0, 0.0), |(sum, weights), s| {
            let w = self.cfg.weight_for(s.timeframe);
            (sum + w * self.vote(s), weights + w)
        });
        if weights <= 0.0 {
            0.0
        } else {
            sum / weights
        }
    }

    pub fn analyze(
        &self,
        signal: &ValidSignal,
        snapshots: &[IndicatorSnapshot],
        divergences: &[Divergence],
    ) -> Recommendation {
        if snapshots.is_empty() {
            return Recommendation {
                action: Action::Wait,
                confidence: 0.0,
                aligned_score: 0.0,
                rationale: format!(
                    "{} {}: no timeframe had enough data, waiting",
                    signal.direction, signal.pair
                ),
            };
        }

        // Fixed summation order regardless of how the snapshots arrived.
        let mut ordered: Vec<&IndicatorSnapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|s| s.timeframe);
        let mut divs: Vec<&Divergence> = divergences.iter().collect();
        divs.sort_by(|a, b| {
            a.timeframe
                .cmp(&b.timeframe)
                .then(a.divergence_type.cmp(&b.divergence_type))
                .then(a.indicator.cmp(&b.indicator))
        });

        let sign = signal.direction.sign();
        let aligned = (self.net_score(&ordered) * sign).clamp(-1.0, 1.0);

        let mut confidence = (aligned + 1.0) / 2.0;
        for d in &divs {
            let effect = self.cfg.divergence_weight * d.strength.factor() * d.confidence;
            if d.direction() == signal.direction {
                confidence += effect;
            } else {
                confidence -= effect;
            }
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let action = if signal.status == SignalStatus::Confirmed && aligned <= -self.cfg.exit_score {
            Action::Exit
        } else if aligned >= self.cfg.enter_score && confidence >= self.cfg.enter_confidence {
            Action::Enter
        } else if aligned <= -self.cfg.avoid_score {
            Action::Avoid
        } else {
            Action::Wait
        };

        Recommendation {
            action,
            confidence,
            aligned_score: aligned,
            rationale: self.rationale(signal, &ordered, &divs, aligned, confidence, action),
        }
    }

    fn rationale(
        &self,
        signal: &ValidSignal,
        snapshots: &[&IndicatorSnapshot],
        divergences: &[&Divergence],
        aligned: f64,
        confidence: f64,
        action: Action,
    ) -> String {
        let mut out = format!(
            "{} {} -> {} (alignment {:+.2}, confidence {:.2}).",
            signal.direction, signal.pair, action, aligned, confidence
        );

        let parts: Vec<String> = snapshots
            .iter()
            .map(|s| {
                format!(
                    "{} {} vote {:+.2} [RSI {:.1} {}, MACD {} hist {:+.4}, ATR {}]",
                    s.timeframe,
                    s.trend,
                    self.vote(s),
                    s.rsi,
                    s.rsi_status,
                    s.macd_signal,
                    s.macd_histogram,
                    s.atr_status
                )
            })
            .collect();
        let _ = write!(out, " Timeframes: {}.", parts.join("; "));

        if !divergences.is_empty() {
            let parts: Vec<String> = divergences
                .iter()
                .map(|d| {
                    let side = if d.direction() == signal.direction {
                        "supports"
                    } else {
                        "opposes"
                    };
                    format!(
                        "{} {} {} ({}, {:.2}, {})",
                        d.timeframe, d.indicator, d.divergence_type, d.strength, d.confidence, side
                    )
                })
                .collect();
            let _ = write!(out, " Divergences: {}.", parts.join("; "));
        }

        let owned: Vec<IndicatorSnapshot> = snapshots.iter().map(|s| (*s).clone()).collect();
        if let Some(view) = IndicatorEngine::consolidate(&owned) {
            let _ = write!(
                out,
                " Overall {} ({:.0}% of {} timeframes), avg RSI {:.1}, max ATR multiplier {:.2}.",
                view.predominant_trend,
                view.trend_consistency * 100.0,
                view.timeframes,
                view.average_rsi,
                view.max_atr_multiplier
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DivergenceStrength, DivergenceType, IndicatorKind, Timeframe};
    use crate::test_helpers::{
        base_time, bearish_snapshot, bullish_snapshot, flat_snapshot, long_signal, short_signal,
    };

    const TFS: [Timeframe; 3] = [Timeframe::M1, Timeframe::M5, Timeframe::M15];

    fn analyzer() -> TrendAnalyzer {
        TrendAnalyzer::new(&TrendConfig::default())
    }

    fn divergence(t: DivergenceType, tf: Timeframe, confidence: f64) -> Divergence {
        Divergence {
            divergence_type: t,
            indicator: IndicatorKind::Rsi,
            timeframe: tf,
            strength: DivergenceStrength::Strong,
            confidence,
            price_swing_low: 95.0,
            price_swing_high: 100.0,
            indicator_swing_low: 30.0,
            indicator_swing_high: 38.0,
            detected_at: base_time(),
        }
    }

    #[test]
    fn bearish_snapshot_votes_bearish() {
        let a = analyzer();
        assert!((a.vote(&bearish_snapshot(Timeframe::M1)) + 0.8).abs() < 1e-12);
        assert!((a.vote(&bullish_snapshot(Timeframe::M1)) - 0.8).abs() < 1e-12);
        assert_eq!(a.vote(&flat_snapshot(Timeframe::M1)), 0.0);
    }

    #[test]
    fn short_with_bearish_timeframes_enters() {
        let snaps: Vec<_> = TFS.iter().map(|&tf| bearish_snapshot(tf)).collect();
        let rec = analyzer().analyze(&short_signal(), &snaps, &[]);
        assert_eq!(rec.action, Action::Enter);
        assert!(rec.confidence > TrendConfig::default().enter_confidence);
        assert!((rec.aligned_score - 0.8).abs() < 1e-12);
        assert!(rec.rationale.contains("15m bearish"));
    }

    #[test]
    fn short_against_bullish_timeframes_avoids() {
        let snaps: Vec<_> = TFS.iter().map(|&tf| bullish_snapshot(tf)).collect();
        let rec = analyzer().analyze(&short_signal(), &snaps, &[]);
        assert_eq!(rec.action, Action::Avoid);
        assert!(rec.confidence < 0.5);
    }

    #[test]
    fn long_mirrors_short() {
        let snaps: Vec<_> = TFS.iter().map(|&tf| bullish_snapshot(tf)).collect();
        assert_eq!(analyzer().analyze(&long_signal(), &snaps, &[]).action, Action::Enter);
    }

    #[test]
    fn no_snapshots_waits() {
        let rec = analyzer().analyze(&short_signal(), &[], &[]);
        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.confidence, 0.0);
    }

    #[test]
    fn mixed_timeframes_wait() {
        let snaps = vec![
            bearish_snapshot(Timeframe::M1),
            flat_snapshot(Timeframe::M5),
            bullish_snapshot(Timeframe::M15),
        ];
        assert_eq!(analyzer().analyze(&short_signal(), &snaps, &[]).action, Action::Wait);
    }

    #[test]
    fn higher_timeframes_outweigh_lower() {
        let snaps = vec![
            bullish_snapshot(Timeframe::M1),
            bearish_snapshot(Timeframe::M15),
            bearish_snapshot(Timeframe::H1),
            bearish_snapshot(Timeframe::H4),
        ];
        let rec = analyzer().analyze(&short_signal(), &snaps, &[]);
        // (0.8 * 1.0 - 0.8 * (2.0 + 2.5 + 3.0)) / 8.5
        assert!((rec.aligned_score - 5.2 / 8.5).abs() < 1e-12);
        assert_eq!(rec.action, Action::Enter);
    }

    #[test]
    fn opposing_divergences_cut_confidence() {
        let snaps: Vec<_> = TFS.iter().map(|&tf| bearish_snapshot(tf)).collect();
        let divs = vec![
            divergence(DivergenceType::RegularBullish, Timeframe::M5, 1.0),
            divergence(DivergenceType::HiddenBullish, Timeframe::M15, 1.0),
        ];
        let rec = analyzer().analyze(&short_signal(), &snaps, &divs);
        // 0.9 - 2 * 0.15
        assert!((rec.confidence - 0.6).abs() < 1e-12);
        assert_eq!(rec.action, Action::Wait);
        assert!(rec.rationale.contains("opposes"));
    }

    #[test]
    fn confirming_divergence_adds_confidence() {
        let snaps: Vec<_> = TFS.iter().map(|&tf| bearish_snapshot(tf)).collect();
        let divs = vec![divergence(DivergenceType::RegularBearish, Timeframe::M15, 0.5)];
        let rec = analyzer().analyze(&short_signal(), &snaps, &divs);
        assert!((rec.confidence - (0.9 + 0.15 * 0.5)).abs() < 1e-12);
        assert!(rec.rationale.contains("supports"));
    }

    #[test]
    fn confirmed_signal_exits_on_flip() {
        let mut signal = short_signal().into_inner();
        signal.status = SignalStatus::Confirmed;
        let signal = crate::models::ValidSignal::new_unchecked(signal);

        let snaps: Vec<_> = TFS.iter().map(|&tf| bullish_snapshot(tf)).collect();
        assert_eq!(analyzer().analyze(&signal, &snaps, &[]).action, Action::Exit);

        let snaps: Vec<_> = TFS.iter().map(|&tf| bearish_snapshot(tf)).collect();
        assert_eq!(analyzer().analyze(&signal, &snaps, &[]).action, Action::Enter);
    }

    #[test]
    fn analyze_is_pure_and_order_independent() {
        let snaps = vec![
            bearish_snapshot(Timeframe::M15),
            bullish_snapshot(Timeframe::M1),
            bearish_snapshot(Timeframe::M5),
        ];
        let mut reversed = snaps.clone();
        reversed.reverse();
        let divs = vec![divergence(DivergenceType::RegularBullish, Timeframe::M5, 0.7)];

        let a = analyzer();
        let first = a.analyze(&short_signal(), &snaps, &divs);
        assert_eq!(first, a.analyze(&short_signal(), &snaps, &divs));
        assert_eq!(first, a.analyze(&short_signal(), &reversed, &divs));
    }
}
