use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::info;

use crate::error::NotifyError;
use crate::models::{Action, Direction, Divergence, Recommendation, Signal};

/// Output boundary for finished analyses.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        signal: &Signal,
        recommendation: &Recommendation,
        divergences: &[Divergence],
    ) -> Result<(), NotifyError>;
}

/// Writes the formatted message to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        signal: &Signal,
        recommendation: &Recommendation,
        divergences: &[Divergence],
    ) -> Result<(), NotifyError> {
        for line in format_recommendation(signal, recommendation, divergences).lines() {
            info!("{}", line);
        }
        Ok(())
    }
}

fn action_marker(action: Action) -> &'static str {
    match action {
        Action::Enter => "✅",
        Action::Wait => "⏸️",
        Action::Avoid => "⛔",
        Action::Exit => "🔴",
    }
}

/// Message text for one recommendation.
pub fn format_recommendation(
    signal: &Signal,
    recommendation: &Recommendation,
    divergences: &[Divergence],
) -> String {
    let arrow = match signal.direction {
        Direction::Long => "📈",
        Direction::Short => "📉",
    };

    let mut msg = format!(
        "{} {} {} {} (x{})\n",
        action_marker(recommendation.action),
        arrow,
        signal.pair,
        signal.direction,
        signal.leverage
    );
    let _ = writeln!(msg, "Entry: {}", signal.entry_price);

    let ladder: Vec<String> = signal
        .take_profits
        .iter()
        .map(|tp| format!("{} ({}%)", tp.price, tp.profit_pct))
        .collect();
    let _ = writeln!(msg, "Targets: {}", ladder.join(" / "));
    if let Some(sl) = signal.stop_loss {
        let _ = writeln!(msg, "Stop: {}", sl);
    }

    let _ = writeln!(
        msg,
        "Recommendation: {} (confidence {:.0}%, alignment {:+.2})",
        recommendation.action,
        recommendation.confidence * 100.0,
        recommendation.aligned_score
    );

    let opposing: Vec<&Divergence> = divergences
        .iter()
        .filter(|d| d.direction() != signal.direction)
        .collect();
    if !opposing.is_empty() {
        let kinds: Vec<String> = opposing
            .iter()
            .map(|d| format!("{} {} {}", d.timeframe, d.indicator, d.divergence_type))
            .collect();
        let _ = writeln!(msg, "⚠️ Divergence against the trade: {}", kinds.join(", "));
    }

    msg.push_str(&recommendation.rationale);
    msg
}
