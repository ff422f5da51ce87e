pub mod sqlite;

pub use sqlite::SqliteSignalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PersistenceError;
use crate::models::{Divergence, IndicatorSnapshot, Recommendation, Signal, SignalStatus};

/// Everything one analysis pass writes for a signal, committed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub snapshots: Vec<IndicatorSnapshot>,
    pub divergences: Vec<Divergence>,
    pub recommendation: Recommendation,
    pub status: SignalStatus,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_signals: usize,
    pub by_status: HashMap<SignalStatus, usize>,
    pub snapshots: usize,
    pub divergences: usize,
}

/// Persistence boundary for signals and their analysis rows. Snapshots and
/// divergences belong to their signal and go away with it.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Stores a new signal and returns its id. Any id already set is ignored.
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, PersistenceError>;

    /// Writes snapshots, divergences, status and summary in one transaction.
    async fn record_analysis(
        &self,
        signal_id: i64,
        record: &AnalysisRecord,
    ) -> Result<(), PersistenceError>;

    async fn update_status(
        &self,
        signal_id: i64,
        status: SignalStatus,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn get_signal(&self, signal_id: i64) -> Result<Option<Signal>, PersistenceError>;

    async fn snapshots_for(&self, signal_id: i64)
        -> Result<Vec<IndicatorSnapshot>, PersistenceError>;

    async fn divergences_for(&self, signal_id: i64) -> Result<Vec<Divergence>, PersistenceError>;

    /// Signals created at or after `since`, oldest first.
    async fn recent_signals(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, PersistenceError>;

    /// Non-terminal signals for `pair`, oldest first.
    async fn active_for_pair(&self, pair: &str) -> Result<Vec<Signal>, PersistenceError>;

    /// Returns false when no such signal existed.
    async fn delete_signal(&self, signal_id: i64) -> Result<bool, PersistenceError>;

    async fn stats(&self) -> Result<StoreStats, PersistenceError>;
}
