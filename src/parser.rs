use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ParserConfig;
use crate::error::{ParseError, ValidationError};
use crate::models::{Direction, Signal, SignalStatus, TakeProfit, ValidSignal};

static PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9]+)\s*/\s*([A-Za-z0-9]+)").unwrap());
static DIRECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(long|short)\b").unwrap());
static LEVERAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bx\s*(\d+)\b").unwrap());
static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\W*entry(?:\s+price)?\s*[-:=]?\s*(\S+)").unwrap());
static TP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)take[\s-]?profits?|\btargets?\b").unwrap());
static TP_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\S+)\s*\(\s*([^%()\s]+)\s*%\s*of\s+profit\s*\)").unwrap()
});
static TP_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\W*tp\s*\d+\s*[-:=]\s*(\S+)").unwrap());
static STOP_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*(?:sl|stop[\s-]?loss)\b\s*[-:=]?\s*(\S+)").unwrap()
});

/// Turns alert text of the form
///
/// ```text
/// 🔥 #UB/USDT (Long📈, x20) 🔥
/// Entry - 0.04869
/// Take-Profit:
/// 🥉 0.04966 (40% of profit)
/// 🚀 0.05112 (100% of profit)
/// ```
///
/// into a [`Signal`], and is the only place a [`ValidSignal`] is made.
#[derive(Debug, Clone)]
pub struct SignalParser {
    min_leverage: u32,
    max_leverage: u32,
}

impl SignalParser {
    pub fn new(cfg: &ParserConfig) -> Self {
        Self {
            min_leverage: cfg.min_leverage,
            max_leverage: cfg.max_leverage,
        }
    }

    pub fn parse(&self, raw: &str) -> Result<Signal, ParseError> {
        self.parse_at(raw, Utc::now())
    }

    /// Parse with an explicit receive time. Pure in `raw` and `received_at`.
    pub fn parse_at(&self, raw: &str, received_at: DateTime<Utc>) -> Result<Signal, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        // Markdown emphasis, e.g. **#PIPPIN**/USDT
        let text = raw.replace('*', "");

        let (header, pair) = text
            .lines()
            .find_map(|line| {
                PAIR.captures(line)
                    .map(|c| (line, format!("{}{}", &c[1], &c[2]).to_ascii_uppercase()))
            })
            .ok_or(ParseError::MissingPair)?;

        // A pair like #LONG/USDT must not decide the direction.
        let direction = direction_in(&PAIR.replace_all(header, " "))
            .or_else(|| direction_in(&PAIR.replace_all(&text, " ")))
            .ok_or(ParseError::MissingDirection)?;

        let leverage = LEVERAGE
            .captures(header)
            .or_else(|| LEVERAGE.captures(&text))
            .ok_or(ParseError::MissingLeverage)?;
        let leverage: u32 = leverage[1].parse().map_err(|_| ParseError::InvalidNumber {
            field: "leverage",
            value: leverage[1].to_string(),
        })?;

        let entry = ENTRY.captures(&text).ok_or(ParseError::MissingEntry)?;
        let entry_price = number("entry", &entry[1])?;

        let take_profits = take_profits(&text)?;
        if take_profits.is_empty() {
            return Err(ParseError::MissingTakeProfits);
        }

        let stop_loss = match STOP_LOSS.captures(&text) {
            Some(c) => Some(number("stop_loss", &c[1])?),
            None => None,
        };

        debug!(
            "Parsed {} {} x{} @ {} with {} TPs",
            pair,
            direction,
            leverage,
            entry_price,
            take_profits.len()
        );

        Ok(Signal {
            id: None,
            pair,
            direction,
            leverage,
            entry_price,
            take_profits,
            stop_loss,
            status: SignalStatus::Received,
            created_at: received_at,
            updated_at: received_at,
            raw_text: raw.to_string(),
            analysis_summary: None,
        })
    }

    /// Boolean form of [`SignalParser::check`].
    pub fn validate(&self, signal: &Signal) -> bool {
        self.check(signal).is_ok()
    }

    /// Validates once and wraps the signal so later stages can rely on it.
    pub fn accept(&self, signal: Signal) -> Result<ValidSignal, ValidationError> {
        self.check(&signal)?;
        Ok(ValidSignal::new_unchecked(signal))
    }

    pub fn check(&self, signal: &Signal) -> Result<(), ValidationError> {
        if signal.leverage < self.min_leverage || signal.leverage > self.max_leverage {
            return Err(ValidationError::LeverageOutOfBounds {
                leverage: signal.leverage,
                min: self.min_leverage,
                max: self.max_leverage,
            });
        }

        let entry = signal.entry_price;
        if !(entry.is_finite() && entry > 0.0) {
            return Err(ValidationError::NonPositivePrice {
                field: "entry_price",
                value: entry,
            });
        }

        if signal.take_profits.is_empty() {
            return Err(ValidationError::NoTakeProfits);
        }

        let mut prev_price = entry;
        let mut prev_pct = 0.0;
        for (i, tp) in signal.take_profits.iter().enumerate() {
            let index = i + 1;
            if !(tp.price.is_finite() && tp.price > 0.0) {
                return Err(ValidationError::NonPositivePrice {
                    field: "take_profit",
                    value: tp.price,
                });
            }

            let beyond = match signal.direction {
                Direction::Long => tp.price > prev_price,
                Direction::Short => tp.price < prev_price,
            };
            if !beyond {
                return Err(ValidationError::LadderOrder {
                    direction: signal.direction,
                    index,
                    price: tp.price,
                    entry,
                });
            }

            if !(tp.profit_pct > 0.0 && tp.profit_pct <= 100.0) || tp.profit_pct < prev_pct {
                return Err(ValidationError::ProfitPercent {
                    index,
                    percent: tp.profit_pct,
                });
            }

            prev_price = tp.price;
            prev_pct = tp.profit_pct;
        }

        if let Some(sl) = signal.stop_loss {
            if !(sl.is_finite() && sl > 0.0) {
                return Err(ValidationError::NonPositivePrice {
                    field: "stop_loss",
                    value: sl,
                });
            }
            let losing_side = match signal.direction {
                Direction::Long => sl < entry,
                Direction::Short => sl > entry,
            };
            if !losing_side {
                return Err(ValidationError::StopLossSide {
                    direction: signal.direction,
                    stop_loss: sl,
                    entry,
                });
            }
        }

        Ok(())
    }
}

fn direction_in(text: &str) -> Option<Direction> {
    if let Some(c) = DIRECTION.captures(text) {
        return Direction::from_str_loose(&c[1]);
    }
    if text.contains('📈') {
        Some(Direction::Long)
    } else if text.contains('📉') {
        Some(Direction::Short)
    } else {
        None
    }
}

fn number(field: &'static str, raw: &str) -> Result<f64, ParseError> {
    let cleaned = raw.trim_end_matches([',', ';']).replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Levels are read from the lines after the take-profit header, or from the
/// whole text when no header is present. A `TP1 - x` ladder without
/// percentages gets even shares ending at 100%.
fn take_profits(text: &str) -> Result<Vec<TakeProfit>, ParseError> {
    let levels = profit_levels(text)?;
    if !levels.is_empty() {
        return Ok(levels);
    }

    let prices = TP_NUMBERED
        .captures_iter(text)
        .map(|c| number("take_profit", &c[1]))
        .collect::<Result<Vec<f64>, ParseError>>()?;
    let n = prices.len() as f64;
    Ok(prices
        .into_iter()
        .enumerate()
        .map(|(i, price)| TakeProfit {
            price,
            profit_pct: 100.0 * (i + 1) as f64 / n,
        })
        .collect())
}

fn profit_levels(text: &str) -> Result<Vec<TakeProfit>, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|l| TP_HEADER.is_match(l) && !TP_LEVEL.is_match(l))
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut levels = Vec::new();
    for line in &lines[start..] {
        let Some(c) = TP_LEVEL.captures(line) else {
            continue;
        };
        levels.push(TakeProfit {
            price: number("take_profit", &c[1])?,
            profit_pct: number("profit_pct", &c[2])?,
        });
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::base_time;

    const UB_LONG: &str = "🔥 #UB/USDT (Long📈, x20) 🔥
Entry - 0.04869
Take-Profit:
🥉 0.04966 (40% of profit)
🥈 0.05015 (60% of profit)
🥇 0.05063 (80% of profit)
🚀 0.05112 (100% of profit)";

    const FOUR_SHORT: &str = "🔥 #4/USDT (Short📉, x20) 🔥
Entry - 0.0854
Take-Profit:
🥉 0.08369 (40% of profit)
🥈 0.08284 (60% of profit)
🥇 0.08198 (80% of profit)
🚀 0.08113 (100% of profit)";

    fn parser() -> SignalParser {
        SignalParser::new(&ParserConfig::default())
    }

    #[test]
    fn parses_long_fixture() {
        let p = parser();
        let s = p.parse_at(UB_LONG, base_time()).unwrap();
        assert_eq!(s.pair, "UBUSDT");
        assert_eq!(s.direction, Direction::Long);
        assert_eq!(s.leverage, 20);
        assert_eq!(s.entry_price, 0.04869);
        assert_eq!(s.tp_prices(), vec![0.04966, 0.05015, 0.05063, 0.05112]);
        let pcts: Vec<f64> = s.take_profits.iter().map(|t| t.profit_pct).collect();
        assert_eq!(pcts, vec![40.0, 60.0, 80.0, 100.0]);
        assert_eq!(s.stop_loss, None);
        assert_eq!(s.status, SignalStatus::Received);
        assert_eq!(s.raw_text, UB_LONG);
        assert!(p.validate(&s));
    }

    #[test]
    fn parses_numeric_symbol_short_fixture() {
        let p = parser();
        let s = p.parse_at(FOUR_SHORT, base_time()).unwrap();
        assert_eq!(s.pair, "4USDT");
        assert_eq!(s.direction, Direction::Short);
        assert_eq!(s.leverage, 20);
        assert_eq!(s.entry_price, 0.0854);
        assert_eq!(s.tp_prices(), vec![0.08369, 0.08284, 0.08198, 0.08113]);
        assert!(p.validate(&s));
        assert!(p.accept(s).is_ok());
    }

    #[test]
    fn strips_markdown_and_reads_stop_loss() {
        let text = "🔥 **#PIPPIN**/usdt (Short📉, x10) 🔥
Entry - 50.64
SL - 52.10
Take-Profit:
🥉 49.6272 (40% of profit)
🚀 48.108 (100% of profit)";
        let s = parser().parse_at(text, base_time()).unwrap();
        assert_eq!(s.pair, "PIPPINUSDT");
        assert_eq!(s.stop_loss, Some(52.10));
        assert_eq!(s.take_profits.len(), 2);
    }

    #[test]
    fn emoji_marker_sets_direction() {
        let text = "#SOL/USDT 📈 x5
Entry: 100
Take-Profit:
101 (50% of profit)";
        let s = parser().parse_at(text, base_time()).unwrap();
        assert_eq!(s.direction, Direction::Long);
        assert_eq!(s.leverage, 5);
    }

    #[test]
    fn missing_fields_are_reported_not_panicked() {
        let p = parser();
        assert_eq!(p.parse("   \n ").unwrap_err(), ParseError::Empty);
        assert_eq!(p.parse("hello world").unwrap_err(), ParseError::MissingPair);
        assert_eq!(
            p.parse("#BTC/USDT x20\nEntry - 1").unwrap_err(),
            ParseError::MissingDirection
        );
        assert_eq!(
            p.parse("#BTC/USDT Long\nEntry - 1").unwrap_err(),
            ParseError::MissingLeverage
        );
        assert_eq!(
            p.parse("#BTC/USDT Long x20\n2 (50% of profit)").unwrap_err(),
            ParseError::MissingEntry
        );
        assert_eq!(
            p.parse("#BTC/USDT Long x20\nEntry - 1\nTake-Profit:").unwrap_err(),
            ParseError::MissingTakeProfits
        );
    }

    #[test]
    fn non_numeric_entry_is_invalid_number() {
        let err = parser()
            .parse("#BTC/USDT Long x20\nEntry - market\nTake-Profit:\n2 (50% of profit)")
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumber {
                field: "entry",
                value: "market".to_string()
            }
        );
    }

    #[test]
    fn rejects_long_ladder_below_entry() {
        let p = parser();
        let mut s = p.parse_at(UB_LONG, base_time()).unwrap();
        s.take_profits[0].price = 0.048;
        assert!(!p.validate(&s));
        assert!(matches!(
            p.check(&s),
            Err(ValidationError::LadderOrder { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_monotonic_short_ladder() {
        let p = parser();
        let mut s = p.parse_at(FOUR_SHORT, base_time()).unwrap();
        s.take_profits[2].price = 0.0830;
        assert!(matches!(
            p.check(&s),
            Err(ValidationError::LadderOrder { index: 3, .. })
        ));

        // Equal rungs are not strictly decreasing.
        let mut s = p.parse_at(FOUR_SHORT, base_time()).unwrap();
        s.take_profits[1].price = s.take_profits[0].price;
        assert!(!p.validate(&s));
    }

    #[test]
    fn numbered_tp_ladder_gets_even_shares() {
        let text = "#GIGGLE/USDT (Long📈, x20)
Entry - 259.49
TP1 - 264.67
TP2 - 269.00
SL - 250.00";
        let p = parser();
        let s = p.parse_at(text, base_time()).unwrap();
        assert_eq!(s.pair, "GIGGLEUSDT");
        assert_eq!(s.tp_prices(), vec![264.67, 269.0]);
        let pcts: Vec<f64> = s.take_profits.iter().map(|t| t.profit_pct).collect();
        assert_eq!(pcts, vec![50.0, 100.0]);
        assert_eq!(s.stop_loss, Some(250.0));
        assert!(p.validate(&s));
    }

    #[test]
    fn pair_name_does_not_set_direction() {
        let text = "🔥 #LONG/USDT (Short📉, x20) 🔥
Entry - 1.0
Take-Profit:
🥉 0.98 (40% of profit)
🚀 0.95 (100% of profit)";
        let p = parser();
        let s = p.parse_at(text, base_time()).unwrap();
        assert_eq!(s.pair, "LONGUSDT");
        assert_eq!(s.direction, Direction::Short);
        assert!(p.validate(&s));
    }

    #[test]
    fn rejects_leverage_out_of_bounds() {
        let p = parser();
        let mut s = p.parse_at(UB_LONG, base_time()).unwrap();
        s.leverage = 50;
        assert_eq!(
            p.check(&s),
            Err(ValidationError::LeverageOutOfBounds {
                leverage: 50,
                min: 1,
                max: 20
            })
        );
    }

    #[test]
    fn rejects_empty_ladder_and_bad_percentages() {
        let p = parser();
        let mut s = p.parse_at(UB_LONG, base_time()).unwrap();
        s.take_profits[2].profit_pct = 50.0;
        assert!(matches!(
            p.check(&s),
            Err(ValidationError::ProfitPercent { index: 3, .. })
        ));

        s.take_profits.clear();
        assert_eq!(p.check(&s), Err(ValidationError::NoTakeProfits));
    }

    #[test]
    fn stop_loss_must_sit_on_losing_side() {
        let p = parser();
        let mut s = p.parse_at(FOUR_SHORT, base_time()).unwrap();
        s.stop_loss = Some(0.08);
        assert!(matches!(
            p.check(&s),
            Err(ValidationError::StopLossSide { .. })
        ));
        s.stop_loss = Some(0.09);
        assert!(p.validate(&s));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_never_panics(text in "\\PC{0,200}") {
            let _ = SignalParser::new(&ParserConfig::default()).parse(&text);
        }

        #[test]
        fn validate_rejects_misordered_long_ladders(
            entry in 1.0f64..1000.0,
            steps in proptest::collection::vec(-5.0f64..5.0, 1..6),
        ) {
            let p = SignalParser::new(&ParserConfig::default());
            let mut price = entry;
            let mut take_profits = Vec::new();
            for (i, step) in steps.iter().enumerate() {
                price += step;
                take_profits.push(TakeProfit { price, profit_pct: 100.0 * (i + 1) as f64 / steps.len() as f64 });
            }
            let strictly_rising = steps.iter().all(|s| *s > 0.0)
                && take_profits.iter().all(|t| t.price > 0.0);
            let signal = Signal {
                id: None,
                pair: "BTCUSDT".to_string(),
                direction: Direction::Long,
                leverage: 10,
                entry_price: entry,
                take_profits,
                stop_loss: None,
                status: SignalStatus::Received,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                raw_text: String::new(),
                analysis_summary: None,
            };
            prop_assert_eq!(p.validate(&signal), strictly_rising);
        }
    }
}
