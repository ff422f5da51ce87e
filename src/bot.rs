use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use signal_engine::config::Config;
use signal_engine::error::PipelineError;
use signal_engine::models::SignalStatus;
use signal_engine::pipeline::{AnalysisPipeline, Outcome};

/// Feeds alerts from a line stream into the pipeline. Alerts are separated by
/// one or more blank lines; each is processed on its own task so a newer alert
/// for the same pair can supersede an older one.
pub struct SignalBot {
    pipeline: Arc<AnalysisPipeline>,
    tasks: JoinSet<Result<Outcome, PipelineError>>,
    received: usize,
    reactivation: Option<Duration>,
    reactivation_window: chrono::Duration,
    sweep: Option<JoinHandle<()>>,
}

impl SignalBot {
    pub fn new(cfg: &Config, pipeline: Arc<AnalysisPipeline>) -> Self {
        info!("{}", "=".repeat(60));
        info!("Signal engine starting up");
        let tfs: Vec<&str> = cfg.pipeline.timeframes.iter().map(|tf| tf.as_str()).collect();
        info!("Timeframes: {}", tfs.join("+"));
        info!(
            "Leverage: x{}-x{} | Workers: {} | Retries: {}",
            cfg.parser.min_leverage, cfg.parser.max_leverage, cfg.pipeline.workers, cfg.pipeline.max_retries
        );
        info!("Database: {}", cfg.database_path);
        let reactivation = cfg.pipeline.reactivation_interval();
        match reactivation {
            Some(every) => info!(
                "Reactivation sweep: every {:?}, last {}h",
                every, cfg.pipeline.reactivation_window_hours
            ),
            None => info!("Reactivation sweep: off"),
        }
        info!("{}", "=".repeat(60));

        Self {
            pipeline,
            tasks: JoinSet::new(),
            received: 0,
            reactivation,
            reactivation_window: chrono::Duration::hours(cfg.pipeline.reactivation_window_hours),
            sweep: None,
        }
    }

    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Reading alerts, blank line between alerts. Press Ctrl+C to stop.");
        let mut lines = input.lines();
        let mut block = String::new();

        let period = self.reactivation.unwrap_or(Duration::from_secs(3600));
        let mut sweeps = interval_at(Instant::now() + period, period);
        sweeps.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.tasks.abort_all();
                    self.shutdown().await;
                    return Ok(());
                }
                _ = sweeps.tick(), if self.reactivation.is_some() => self.start_sweep(),
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_result(done.map_err(|e| PipelineError::Join(e.to_string())).and_then(|r| r));
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) if line.trim().is_empty() => self.dispatch(&mut block),
                        Some(line) => {
                            block.push_str(&line);
                            block.push('\n');
                        }
                        None => break,
                    }
                }
            }
        }

        self.dispatch(&mut block);
        while let Some(done) = self.tasks.join_next().await {
            log_result(done.map_err(|e| PipelineError::Join(e.to_string())).and_then(|r| r));
        }
        self.shutdown().await;
        Ok(())
    }

    fn dispatch(&mut self, block: &mut String) {
        let raw = std::mem::take(block);
        if raw.trim().is_empty() {
            return;
        }
        self.received += 1;
        debug!("Alert #{} received ({} bytes)", self.received, raw.len());

        let pipeline = Arc::clone(&self.pipeline);
        self.tasks.spawn(async move { pipeline.process(&raw).await });
    }

    /// Re-runs waiting signals in the background. Notifications go out from
    /// the pipeline as each one finishes.
    fn start_sweep(&mut self) {
        if self.sweep.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Previous reactivation sweep still running");
            return;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let since = Utc::now() - self.reactivation_window;
        self.sweep = Some(tokio::spawn(async move {
            match pipeline.reactivate_waiting(since).await {
                Ok(outcomes) => {
                    let moved = outcomes
                        .iter()
                        .filter(|o| o.signal.status != SignalStatus::Analyzed)
                        .count();
                    info!(
                        "🔁 Reactivation sweep: {} re-analyzed, {} no longer waiting",
                        outcomes.len(),
                        moved
                    );
                }
                Err(e) => error!("Reactivation sweep failed: {}", e),
            }
        }));
    }

    async fn print_status(&self) {
        match self.pipeline.store().stats().await {
            Ok(stats) => {
                let count = |st: SignalStatus| stats.by_status.get(&st).copied().unwrap_or(0);
                info!("Alerts read: {}", self.received);
                info!(
                    "Signals: {} | confirmed {} | analyzed {} | rejected {} | expired {}",
                    stats.total_signals,
                    count(SignalStatus::Confirmed),
                    count(SignalStatus::Analyzed),
                    count(SignalStatus::Rejected),
                    count(SignalStatus::Expired)
                );
                info!(
                    "Stored snapshots: {} | divergences: {}",
                    stats.snapshots, stats.divergences
                );
            }
            Err(e) => warn!("Could not read store stats: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        if let Some(sweep) = self.sweep.take() {
            sweep.abort();
        }
        self.print_status().await;
        info!("Signal engine stopped.");
    }
}

fn log_result(result: Result<Outcome, PipelineError>) {
    match result {
        Ok(Outcome::Analyzed(out)) => debug!(
            "Signal {:?} finished as {}",
            out.signal.id, out.signal.status
        ),
        Ok(Outcome::Rejected { signal_id, reason }) => {
            debug!("Signal {} rejected: {}", signal_id, reason)
        }
        Ok(Outcome::Discarded(_)) => {}
        Err(PipelineError::Superseded { pair }) => info!("Analysis for {} superseded", pair),
        Err(e) => error!("Alert processing failed: {}", e),
    }
}
