use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{DivergenceDetector, IndicatorEngine, TrendAnalyzer};
use crate::error::{ParseError, PersistenceError, PipelineError, ValidationError};
use crate::exchange::{PriceSource, RetryPolicy};
use crate::models::{
    Divergence, IndicatorSnapshot, Recommendation, Signal, SignalStatus, Timeframe, ValidSignal,
};
use crate::notify::Notifier;
use crate::parser::SignalParser;
use crate::storage::{AnalysisRecord, SignalStore};

/// Everything one completed analysis produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// The stored signal after the analysis was committed.
    pub signal: Signal,
    pub snapshots: Vec<IndicatorSnapshot>,
    pub divergences: Vec<Divergence>,
    pub recommendation: Recommendation,
    /// Timeframes left out for lack of data.
    pub skipped: Vec<Timeframe>,
}

#[derive(Debug)]
pub enum Outcome {
    /// Text that is not an alert. Nothing was stored.
    Discarded(ParseError),
    /// Parsed but invalid; stored as rejected and not analyzed.
    Rejected {
        signal_id: i64,
        reason: ValidationError,
    },
    Analyzed(Box<AnalysisOutcome>),
}

/// Result of one timeframe's fan-out task.
enum Frame {
    Ready(IndicatorSnapshot, Vec<Divergence>),
    Skipped(Timeframe),
}

struct InFlight {
    generation: u64,
    signal_id: i64,
    abort: Option<AbortHandle>,
}

/// Runs alerts through parse, fan-out analysis, aggregation and storage.
///
/// At most one analysis runs per pair: a newer signal aborts the older one
/// and marks it expired. Writes for one signal id are serialized.
pub struct AnalysisPipeline {
    prices: Arc<dyn PriceSource>,
    store: Arc<dyn SignalStore>,
    notifier: Option<Arc<dyn Notifier>>,

    parser: SignalParser,
    engine: IndicatorEngine,
    detector: DivergenceDetector,
    analyzer: TrendAnalyzer,

    timeframes: Vec<Timeframe>,
    history_limit: usize,
    workers: Arc<Semaphore>,
    retry: RetryPolicy,

    next_generation: AtomicU64,
    in_flight: DashMap<String, InFlight>,
    write_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl AnalysisPipeline {
    pub fn new(cfg: &Config, prices: Arc<dyn PriceSource>, store: Arc<dyn SignalStore>) -> Self {
        Self {
            prices,
            store,
            notifier: None,
            parser: SignalParser::new(&cfg.parser),
            engine: IndicatorEngine::new(&cfg.indicators),
            detector: DivergenceDetector::new(&cfg.divergence),
            analyzer: TrendAnalyzer::new(&cfg.trend),
            timeframes: cfg.pipeline.timeframes.clone(),
            history_limit: cfg.pipeline.history_limit,
            workers: Arc::new(Semaphore::new(cfg.pipeline.workers.max(1))),
            retry: cfg.pipeline.retry_policy(),
            next_generation: AtomicU64::new(0),
            in_flight: DashMap::new(),
            write_locks: DashMap::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn parser(&self) -> &SignalParser {
        &self.parser
    }

    pub fn store(&self) -> &Arc<dyn SignalStore> {
        &self.store
    }

    /// Number of pairs with an analysis still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Handles one raw alert end to end.
    pub async fn process(self: &Arc<Self>, raw: &str) -> Result<Outcome, PipelineError> {
        self.process_at(raw, Utc::now()).await
    }

    pub async fn process_at(
        self: &Arc<Self>,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Outcome, PipelineError> {
        let signal = match self.parser.parse_at(raw, received_at) {
            Ok(s) => s,
            Err(e) => {
                warn!("Discarding message: {}", e);
                return Ok(Outcome::Discarded(e));
            }
        };

        match self.parser.accept(signal.clone()) {
            Ok(valid) => {
                let outcome = self.analyze_new(valid).await?;
                Ok(Outcome::Analyzed(Box::new(outcome)))
            }
            Err(reason) => {
                warn!("Rejecting {} {}: {}", signal.pair, signal.direction, reason);
                let mut rejected = signal;
                rejected.status = SignalStatus::Rejected;
                rejected.analysis_summary = Some(reason.to_string());
                let signal_id = self.persist("insert rejected signal", |store| {
                    let rejected = rejected.clone();
                    async move { store.insert_signal(&rejected).await }
                })
                .await?;
                Ok(Outcome::Rejected { signal_id, reason })
            }
        }
    }

    /// Stores a validated signal as received, then analyzes it.
    pub async fn analyze_new(
        self: &Arc<Self>,
        signal: ValidSignal,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let stored = signal.clone();
        let id = self
            .persist("insert signal", |store| {
                let stored = stored.clone();
                async move { store.insert_signal(&stored).await }
            })
            .await?;
        info!(
            "Signal {} stored: {} {} x{} entry {}",
            id, signal.pair, signal.direction, signal.leverage, signal.entry_price
        );
        self.submit(signal.with_id(id)).await
    }

    /// Runs a fresh analysis for a stored signal that is not yet terminal and
    /// is still the newest open signal for its pair. An older one is expired.
    pub async fn reanalyze(self: &Arc<Self>, signal_id: i64) -> Result<AnalysisOutcome, PipelineError> {
        let signal = self
            .store
            .get_signal(signal_id)
            .await?
            .ok_or(PersistenceError::NotFound(signal_id))?;

        if signal.status.is_terminal() {
            return Err(ValidationError::InvalidTransition {
                from: signal.status,
                to: SignalStatus::Analyzed,
            }
            .into());
        }

        let newer = self
            .store
            .active_for_pair(&signal.pair)
            .await?
            .iter()
            .filter_map(|s| s.id)
            .any(|id| id > signal_id);
        if newer {
            info!("Signal {} for {} has a newer signal, expiring it", signal_id, signal.pair);
            self.expire(signal_id).await;
            return Err(PipelineError::Superseded { pair: signal.pair });
        }

        let valid = self.parser.accept(signal)?;
        self.submit(valid).await
    }

    /// Re-runs signals created since `since` that are still waiting
    /// (analyzed, not yet confirmed) and returns the fresh analyses.
    /// Pairs with an analysis in flight are left alone.
    pub async fn reactivate_waiting(
        self: &Arc<Self>,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnalysisOutcome>, PipelineError> {
        let waiting: Vec<Signal> = self
            .store
            .recent_signals(since)
            .await?
            .into_iter()
            .filter(|s| s.status == SignalStatus::Analyzed)
            .collect();
        debug!("Reactivation sweep: {} waiting signals", waiting.len());

        let mut outcomes = Vec::new();
        for signal in waiting {
            let Some(id) = signal.id else { continue };
            if self.in_flight.contains_key(&signal.pair) {
                debug!("Skipping signal {}: {} is being analyzed", id, signal.pair);
                continue;
            }

            match self.reanalyze(id).await {
                Ok(out) => {
                    if out.recommendation.action.resulting_status() != SignalStatus::Analyzed {
                        info!(
                            "♻️ Signal {} {} reactivated: {}",
                            id, signal.pair, out.recommendation.action
                        );
                    }
                    outcomes.push(out);
                }
                Err(PipelineError::Superseded { pair }) => {
                    debug!("Signal {} for {} superseded during sweep", id, pair)
                }
                Err(e) => warn!("Reactivation of signal {} failed: {}", id, e),
            }
        }
        Ok(outcomes)
    }

    async fn submit(self: &Arc<Self>, signal: ValidSignal) -> Result<AnalysisOutcome, PipelineError> {
        let pair = signal.pair.clone();
        let signal_id = signal.id.ok_or(PersistenceError::NotFound(0))?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.in_flight.insert(
            pair.clone(),
            InFlight {
                generation,
                signal_id,
                abort: None,
            },
        );
        if let Some(prev) = previous {
            if let Some(abort) = prev.abort {
                abort.abort();
            }
            info!(
                "Signal {} supersedes in-flight signal {} for {}",
                signal_id, prev.signal_id, pair
            );
            self.expire(prev.signal_id).await;
        }
        self.expire_older(&pair, signal_id).await;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(signal, generation).await });
        if let Some(mut entry) = self.in_flight.get_mut(&pair) {
            if entry.generation == generation {
                entry.abort = Some(handle.abort_handle());
            }
        }

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PipelineError::Superseded { pair }),
            Err(e) => {
                self.in_flight
                    .remove_if(&pair, |_, entry| entry.generation == generation);
                Err(PipelineError::Join(e.to_string()))
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        signal: ValidSignal,
        generation: u64,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let (snapshots, divergences, skipped) = self.fan_out(&signal).await;
        let recommendation = self.analyzer.analyze(&signal, &snapshots, &divergences);

        // Past this point the analysis can no longer be superseded.
        let claimed = self
            .in_flight
            .remove_if(&signal.pair, |_, entry| entry.generation == generation)
            .is_some();
        if !claimed {
            debug!("Dropping stale analysis for {}", signal.pair);
            return Err(PipelineError::Superseded {
                pair: signal.pair.clone(),
            });
        }

        let analyzed_at = Utc::now();
        let mut updated = signal.signal().clone();
        settle(&mut updated, recommendation.action.resulting_status(), analyzed_at);
        updated.analysis_summary = Some(recommendation.rationale.clone());

        let signal_id = updated.id.ok_or(PersistenceError::NotFound(0))?;
        let record = AnalysisRecord {
            snapshots: snapshots.clone(),
            divergences: divergences.clone(),
            recommendation: recommendation.clone(),
            status: updated.status,
            analyzed_at,
        };

        self.commit(signal_id, &record).await?;

        info!(
            "Signal {} {} {} -> {} (confidence {:.2}, {} timeframes, {} divergences)",
            signal_id,
            updated.pair,
            updated.direction,
            recommendation.action,
            recommendation.confidence,
            snapshots.len(),
            divergences.len()
        );

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&updated, &recommendation, &divergences).await {
                warn!("Notification for signal {} failed: {}", signal_id, e);
            }
        }

        Ok(AnalysisOutcome {
            signal: updated,
            snapshots,
            divergences,
            recommendation,
            skipped,
        })
    }

    /// One task per timeframe, bounded by the worker semaphore, joined before
    /// aggregation. Results come back ordered by timeframe.
    async fn fan_out(
        self: &Arc<Self>,
        signal: &ValidSignal,
    ) -> (Vec<IndicatorSnapshot>, Vec<Divergence>, Vec<Timeframe>) {
        let mut tasks = JoinSet::new();
        for &tf in &self.timeframes {
            let this = Arc::clone(self);
            let signal = signal.clone();
            tasks.spawn(async move { this.analyze_timeframe(&signal, tf).await });
        }

        let mut frames = Vec::with_capacity(self.timeframes.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(frame) => frames.push(frame),
                Err(e) => warn!("Timeframe task for {} failed: {}", signal.pair, e),
            }
        }

        let mut snapshots = Vec::new();
        let mut divergences = Vec::new();
        let mut skipped = Vec::new();
        for frame in frames {
            match frame {
                Frame::Ready(snapshot, divs) => {
                    snapshots.push(snapshot);
                    divergences.extend(divs);
                }
                Frame::Skipped(tf) => skipped.push(tf),
            }
        }

        snapshots.sort_by_key(|s| s.timeframe);
        divergences.sort_by(|a, b| {
            a.timeframe
                .cmp(&b.timeframe)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.divergence_type.cmp(&b.divergence_type))
                .then(a.indicator.cmp(&b.indicator))
        });
        skipped.sort();
        (snapshots, divergences, skipped)
    }

    async fn analyze_timeframe(&self, signal: &ValidSignal, tf: Timeframe) -> Frame {
        let Ok(_permit) = Arc::clone(&self.workers).acquire_owned().await else {
            warn!("Worker pool closed, skipping {} {}", signal.pair, tf);
            return Frame::Skipped(tf);
        };

        let what = format!("fetch {} {}", signal.pair, tf);
        let prices = &self.prices;
        let candles = match self
            .retry
            .run(&what, move || prices.fetch_candles(&signal.pair, tf, self.history_limit))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("{} {} unavailable, skipping: {}", signal.pair, tf, e);
                return Frame::Skipped(tf);
            }
        };

        let series = match self.engine.series(&candles) {
            Ok(s) => s,
            Err(e) => {
                debug!("{} {} skipped: {}", signal.pair, tf, e);
                return Frame::Skipped(tf);
            }
        };
        let snapshot = match self.engine.snapshot_from(tf, &candles, &series) {
            Ok(s) => s,
            Err(e) => {
                debug!("{} {} skipped: {}", signal.pair, tf, e);
                return Frame::Skipped(tf);
            }
        };

        let divergences = self.detector.detect(signal, &snapshot, &candles, &series);
        debug!(
            "{} {}: trend={} rsi={:.1} macd={} divergences={}",
            signal.pair,
            tf,
            snapshot.trend,
            snapshot.rsi,
            snapshot.macd_signal,
            divergences.len()
        );
        Frame::Ready(snapshot, divergences)
    }

    /// Writes an analysis unless the signal was expired while it ran.
    async fn commit(&self, signal_id: i64, record: &AnalysisRecord) -> Result<(), PipelineError> {
        self.serialized(signal_id, || async move {
            let current = self
                .store
                .get_signal(signal_id)
                .await?
                .ok_or(PersistenceError::NotFound(signal_id))?;
            if current.status.is_terminal() {
                debug!("Signal {} is {}, dropping its analysis", signal_id, current.status);
                return Err(PipelineError::Superseded { pair: current.pair });
            }

            self.persist("record analysis", |store| {
                let record = record.clone();
                async move { store.record_analysis(signal_id, &record).await }
            })
            .await
        })
        .await
    }

    /// Expires stored open signals for `pair` older than `signal_id`.
    async fn expire_older(&self, pair: &str, signal_id: i64) {
        let open = match self.store.active_for_pair(pair).await {
            Ok(open) => open,
            Err(e) => {
                error!("Could not look up open signals for {}: {}", pair, e);
                return;
            }
        };
        for old in open.iter().filter_map(|s| s.id).filter(|&id| id < signal_id) {
            info!("Signal {} supersedes stored signal {} for {}", signal_id, old, pair);
            self.expire(old).await;
        }
    }

    async fn expire(&self, signal_id: i64) {
        let at = Utc::now();
        let result = self
            .serialized(signal_id, || {
                self.persist("expire signal", |store| async move {
                    store.update_status(signal_id, SignalStatus::Expired, at).await
                })
            })
            .await;
        if let Err(e) = result {
            error!("Could not expire superseded signal {}: {}", signal_id, e);
        }
    }

    /// Store call under the retry policy. Exhaustion is logged and surfaced.
    async fn persist<T, F, Fut>(&self, what: &str, op: F) -> Result<T, PipelineError>
    where
        F: Fn(Arc<dyn SignalStore>) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let store = &self.store;
        self.retry
            .run(what, || op(Arc::clone(store)))
            .await
            .map_err(|e| {
                error!("{} failed: {}", what, e);
                PipelineError::Persistence(e)
            })
    }

    /// Runs `f` while holding the write lock for `signal_id`.
    async fn serialized<T, F, Fut>(&self, signal_id: i64, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = Arc::clone(self.write_locks.entry(signal_id).or_default().value());
        let out = {
            let _guard = lock.lock().await;
            f().await
        };
        drop(lock);
        self.write_locks
            .remove_if(&signal_id, |_, l| Arc::strong_count(l) == 1);
        out
    }
}

/// Moves `signal` toward `target`, stepping through analyzed when needed.
/// A target the lifecycle does not allow leaves the status unchanged.
fn settle(signal: &mut Signal, target: SignalStatus, at: DateTime<Utc>) {
    if !signal.status.can_transition_to(target)
        && signal.status.can_transition_to(SignalStatus::Analyzed)
    {
        let _ = signal.transition(SignalStatus::Analyzed, at);
    }
    if let Err(e) = signal.transition(target, at) {
        debug!("Keeping status of signal {:?}: {}", signal.id, e);
        signal.updated_at = at;
    }
}
