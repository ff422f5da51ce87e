use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use signal_engine::config::Config;
use signal_engine::exchange::HistoricalPriceSource;
use signal_engine::models::Timeframe;
use signal_engine::pipeline::{AnalysisPipeline, Outcome};
use signal_engine::storage::{SignalStore, SqliteSignalStore};

/// One alert from the replay file, optionally pinned to a replay time with a
/// leading `@ <rfc3339>` line.
#[derive(Debug, PartialEq)]
struct ReplayAlert {
    at: Option<DateTime<Utc>>,
    text: String,
}

fn split_alerts(input: &str) -> Result<Vec<ReplayAlert>> {
    let mut alerts = Vec::new();
    for block in input.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let (at, text) = match block.strip_prefix('@') {
            Some(rest) => {
                let (stamp, text) = rest.split_once('\n').unwrap_or((rest, ""));
                let at = DateTime::parse_from_rfc3339(stamp.trim())
                    .with_context(|| format!("bad replay time {:?}", stamp.trim()))?;
                (Some(at.with_timezone(&Utc)), text.trim())
            }
            None => (None, block),
        };
        if !text.is_empty() {
            alerts.push(ReplayAlert {
                at,
                text: text.to_string(),
            });
        }
    }
    Ok(alerts)
}

/// Loads every `<SYMBOL>_<timeframe>.json` file in `dir`.
fn load_candles(dir: &Path, source: &mut HistoricalPriceSource) -> Result<usize> {
    let mut files = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((symbol, tf)) = stem.rsplit_once('_') else {
            continue;
        };
        let Some(tf) = Timeframe::from_str_loose(tf) else {
            continue;
        };

        let n = source.load_file(symbol, tf, &path)?;
        println!("  {} {}: {} candles", symbol.to_ascii_uppercase(), tf, n);
        files += 1;
    }
    Ok(files)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;

    let args: Vec<String> = std::env::args().collect();
    let data_dir = args.get(1).map(String::as_str).unwrap_or("data/candles");
    let alerts_file = args.get(2).map(String::as_str).unwrap_or("data/alerts.txt");

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          SIGNAL ENGINE REPLAY                            ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("Candles: {}", data_dir);
    println!("Alerts:  {}", alerts_file);
    println!();

    let mut source = HistoricalPriceSource::new();
    println!("Data loaded:");
    if load_candles(Path::new(data_dir), &mut source)? == 0 {
        bail!("no <SYMBOL>_<timeframe>.json candle files in {}", data_dir);
    }
    println!();

    let text = std::fs::read_to_string(alerts_file)
        .with_context(|| format!("reading {}", alerts_file))?;
    let alerts = split_alerts(&text)?;

    let source = Arc::new(source);
    let store = Arc::new(SqliteSignalStore::open_in_memory()?);
    let pipeline = Arc::new(AnalysisPipeline::new(
        &cfg,
        Arc::clone(&source) as _,
        Arc::clone(&store) as _,
    ));

    for (i, alert) in alerts.iter().enumerate() {
        let at = match alert.at {
            Some(at) => {
                source.set_time(at);
                at
            }
            None => {
                source.clear_time();
                source.latest_time().unwrap_or_else(Utc::now)
            }
        };

        match pipeline.process_at(&alert.text, at).await {
            Ok(Outcome::Analyzed(out)) => println!(
                "#{:<3} {} {:<12} {:<5} -> {:<5} conf {:.2} align {:+.2} ({} tf, {} div, skipped {:?})",
                i + 1,
                at.format("%Y-%m-%d %H:%M"),
                out.signal.pair,
                out.signal.direction.as_str(),
                out.recommendation.action.as_str(),
                out.recommendation.confidence,
                out.recommendation.aligned_score,
                out.snapshots.len(),
                out.divergences.len(),
                out.skipped
            ),
            Ok(Outcome::Rejected { reason, .. }) => println!("#{:<3} rejected: {}", i + 1, reason),
            Ok(Outcome::Discarded(e)) => println!("#{:<3} not an alert: {}", i + 1, e),
            Err(e) => println!("#{:<3} failed: {}", i + 1, e),
        }
    }

    let stats = store.stats().await?;
    println!();
    println!("Alerts:     {}", alerts.len());
    println!("Signals:    {}", stats.total_signals);
    let mut by_status: Vec<_> = stats.by_status.iter().collect();
    by_status.sort_by_key(|(st, _)| st.as_str());
    for (status, count) in by_status {
        println!("  {:<10} {}", status.as_str(), count);
    }
    println!("Snapshots:  {}", stats.snapshots);
    println!("Divergences: {}", stats.divergences);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_blocks_and_reads_replay_time() {
        let text = "@ 2024-01-15T12:30:00Z\n#BTC/USDT (Short, x20)\nEntry - 1\n\n\n\n#ETH/USDT (Long, x10)\nEntry - 2\n";
        let alerts = split_alerts(text).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(
            alerts[0].at.map(|t| t.to_rfc3339()),
            Some("2024-01-15T12:30:00+00:00".to_string())
        );
        assert!(alerts[0].text.starts_with("#BTC/USDT"));
        assert_eq!(alerts[1].at, None);
        assert!(alerts[1].text.ends_with("Entry - 2"));
    }

    #[test]
    fn bad_replay_time_is_an_error() {
        assert!(split_alerts("@ yesterday\n#BTC/USDT").is_err());
    }
}
