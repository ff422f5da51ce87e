use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::models::{
    Direction, Divergence, DivergenceStrength, DivergenceType, IndicatorKind, IndicatorSnapshot,
    MacdSignal, RsiStatus, Signal, SignalStatus, TakeProfit, Timeframe, Trend, VolatilityStatus,
};
use crate::storage::{AnalysisRecord, SignalStore, StoreStats};

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('LONG', 'SHORT')),
    entry_price REAL NOT NULL,
    tp1 REAL,
    tp2 REAL,
    tp3 REAL,
    tp4 REAL,
    stop_loss REAL,
    leverage INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'received',
    confirmation_status TEXT,
    match_percentage REAL,
    confidence REAL,
    signal_data TEXT NOT NULL,
    original_message TEXT NOT NULL,
    analysis_summary TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_pair ON signals(pair);
CREATE INDEX IF NOT EXISTS idx_signals_created_at ON signals(created_at);

CREATE TABLE IF NOT EXISTS signal_analysis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER NOT NULL,
    timeframe TEXT NOT NULL,
    trend TEXT NOT NULL,
    rsi REAL NOT NULL,
    rsi_status TEXT NOT NULL,
    macd_signal TEXT NOT NULL,
    macd_line REAL NOT NULL,
    macd_signal_line REAL NOT NULL,
    macd_histogram REAL NOT NULL,
    atr REAL NOT NULL,
    atr_status TEXT NOT NULL,
    atr_multiplier REAL NOT NULL,
    close_price REAL NOT NULL,
    analysis_timestamp TEXT NOT NULL,
    FOREIGN KEY (signal_id) REFERENCES signals(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_signal_analysis_signal ON signal_analysis(signal_id);

CREATE TABLE IF NOT EXISTS divergences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    indicator TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    strength TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    price_swing_low REAL NOT NULL,
    price_swing_high REAL NOT NULL,
    indicator_swing_low REAL NOT NULL,
    indicator_swing_high REAL NOT NULL,
    detected_at TEXT NOT NULL,
    FOREIGN KEY (signal_id) REFERENCES signals(id) ON DELETE CASCADE,
    CHECK (price_swing_low < price_swing_high),
    CHECK (indicator_swing_low < indicator_swing_high)
);

CREATE INDEX IF NOT EXISTS idx_divergences_signal ON divergences(signal_id);
"#;

/// Full signal payload kept alongside the flat columns, so ladders longer
/// than four rungs survive a round trip.
#[derive(Debug, Serialize, Deserialize)]
struct SignalData {
    take_profits: Vec<TakeProfit>,
    stop_loss: Option<f64>,
}

/// SQLite-backed [`SignalStore`]. One connection behind a mutex; calls run
/// on the blocking pool.
#[derive(Clone)]
pub struct SqliteSignalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSignalStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::open_in_memory();
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        info!("Opened signal store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| std::io::Error::other("signal store mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| std::io::Error::other(format!("signal store task failed: {}", e)))?
    }
}

fn insert_signal(conn: &Connection, signal: &Signal) -> Result<i64, PersistenceError> {
    let tp = |i: usize| signal.take_profits.get(i).map(|t| t.price);
    let data = serde_json::to_string(&SignalData {
        take_profits: signal.take_profits.clone(),
        stop_loss: signal.stop_loss,
    })?;

    conn.execute(
        r#"
        INSERT INTO signals
        (pair, direction, entry_price, tp1, tp2, tp3, tp4, stop_loss, leverage, status,
         signal_data, original_message, analysis_summary, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            signal.pair,
            signal.direction.as_str(),
            signal.entry_price,
            tp(0),
            tp(1),
            tp(2),
            tp(3),
            signal.stop_loss,
            signal.leverage,
            signal.status.as_str(),
            data,
            signal.raw_text,
            signal.analysis_summary,
            signal.created_at,
            signal.updated_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn record_analysis(
    conn: &mut Connection,
    signal_id: i64,
    record: &AnalysisRecord,
) -> Result<(), PersistenceError> {
    // Dropping the transaction on any early return rolls it back.
    let tx = conn.transaction()?;

    let rec = &record.recommendation;
    let updated = tx.execute(
        r#"
        UPDATE signals
        SET status = ?1, confirmation_status = ?2, match_percentage = ?3, confidence = ?4,
            analysis_summary = ?5, updated_at = ?6
        WHERE id = ?7
        "#,
        params![
            record.status.as_str(),
            rec.action.as_str(),
            (rec.aligned_score + 1.0) * 50.0,
            rec.confidence,
            rec.rationale,
            record.analyzed_at,
            signal_id,
        ],
    )?;
    if updated == 0 {
        return Err(PersistenceError::NotFound(signal_id));
    }

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO signal_analysis
            (signal_id, timeframe, trend, rsi, rsi_status, macd_signal, macd_line,
             macd_signal_line, macd_histogram, atr, atr_status, atr_multiplier, close_price,
             analysis_timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )?;
        for s in &record.snapshots {
            stmt.execute(params![
                signal_id,
                s.timeframe.as_str(),
                s.trend.as_str(),
                s.rsi,
                s.rsi_status.as_str(),
                s.macd_signal.as_str(),
                s.macd_line,
                s.macd_signal_line,
                s.macd_histogram,
                s.atr,
                s.atr_status.as_str(),
                s.atr_multiplier,
                s.close_price,
                s.analysis_timestamp,
            ])?;
        }

        let mut stmt = tx.prepare(
            r#"
            INSERT INTO divergences
            (signal_id, type, indicator, timeframe, strength, confidence, price_swing_low,
             price_swing_high, indicator_swing_low, indicator_swing_high, detected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )?;
        for d in &record.divergences {
            stmt.execute(params![
                signal_id,
                d.divergence_type.as_str(),
                d.indicator.as_str(),
                d.timeframe.as_str(),
                d.strength.as_str(),
                d.confidence,
                d.price_swing_low,
                d.price_swing_high,
                d.indicator_swing_low,
                d.indicator_swing_high,
                d.detected_at,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn corrupt(column: &str, value: &str) -> PersistenceError {
    PersistenceError::Corrupt(format!("unknown {} value {:?}", column, value))
}

fn parse_col<T>(
    row: &Row<'_>,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, PersistenceError> {
    let raw: String = row.get(column)?;
    parse(&raw).ok_or_else(|| corrupt(column, &raw))
}

fn signal_from_row(row: &Row<'_>) -> Result<Signal, PersistenceError> {
    let data: String = row.get("signal_data")?;
    let data: SignalData = serde_json::from_str(&data)?;

    Ok(Signal {
        id: Some(row.get("id")?),
        pair: row.get("pair")?,
        direction: parse_col(row, "direction", Direction::from_str_loose)?,
        leverage: row.get("leverage")?,
        entry_price: row.get("entry_price")?,
        take_profits: data.take_profits,
        stop_loss: data.stop_loss,
        status: parse_col(row, "status", SignalStatus::from_str_loose)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        raw_text: row.get("original_message")?,
        analysis_summary: row.get("analysis_summary")?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> Result<IndicatorSnapshot, PersistenceError> {
    Ok(IndicatorSnapshot {
        timeframe: parse_col(row, "timeframe", Timeframe::from_str_loose)?,
        trend: parse_col(row, "trend", Trend::from_str_loose)?,
        rsi: row.get("rsi")?,
        rsi_status: parse_col(row, "rsi_status", RsiStatus::from_str_loose)?,
        macd_line: row.get("macd_line")?,
        macd_signal_line: row.get("macd_signal_line")?,
        macd_histogram: row.get("macd_histogram")?,
        macd_signal: parse_col(row, "macd_signal", MacdSignal::from_str_loose)?,
        atr: row.get("atr")?,
        atr_status: parse_col(row, "atr_status", VolatilityStatus::from_str_loose)?,
        atr_multiplier: row.get("atr_multiplier")?,
        close_price: row.get("close_price")?,
        analysis_timestamp: row.get("analysis_timestamp")?,
    })
}

fn divergence_from_row(row: &Row<'_>) -> Result<Divergence, PersistenceError> {
    Ok(Divergence {
        divergence_type: parse_col(row, "type", DivergenceType::from_str_loose)?,
        indicator: parse_col(row, "indicator", IndicatorKind::from_str_loose)?,
        timeframe: parse_col(row, "timeframe", Timeframe::from_str_loose)?,
        strength: parse_col(row, "strength", DivergenceStrength::from_str_loose)?,
        confidence: row.get("confidence")?,
        price_swing_low: row.get("price_swing_low")?,
        price_swing_high: row.get("price_swing_high")?,
        indicator_swing_low: row.get("indicator_swing_low")?,
        indicator_swing_high: row.get("indicator_swing_high")?,
        detected_at: row.get("detected_at")?,
    })
}

/// Runs `sql` and maps every row through `map`.
fn query_all<T>(
    conn: &Connection,
    sql: &str,
    param: impl rusqlite::ToSql,
    map: impl Fn(&Row<'_>) -> Result<T, PersistenceError>,
) -> Result<Vec<T>, PersistenceError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([param])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(row)?);
    }
    Ok(out)
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, PersistenceError> {
        let signal = signal.clone();
        let id = self.with_conn(move |conn| insert_signal(conn, &signal)).await?;
        debug!("Inserted signal {}", id);
        Ok(id)
    }

    async fn record_analysis(
        &self,
        signal_id: i64,
        record: &AnalysisRecord,
    ) -> Result<(), PersistenceError> {
        let record = record.clone();
        self.with_conn(move |conn| record_analysis(conn, signal_id, &record))
            .await
    }

    async fn update_status(
        &self,
        signal_id: i64,
        status: SignalStatus,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE signals SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), at, signal_id],
            )?;
            if n == 0 {
                return Err(PersistenceError::NotFound(signal_id));
            }
            Ok(())
        })
        .await
    }

    async fn get_signal(&self, signal_id: i64) -> Result<Option<Signal>, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM signals WHERE id = ?1")?;
            let mut rows = stmt.query([signal_id])?;
            let signal = match rows.next()? {
                Some(row) => Some(signal_from_row(row)?),
                None => None,
            };
            Ok(signal)
        })
        .await
    }

    async fn snapshots_for(
        &self,
        signal_id: i64,
    ) -> Result<Vec<IndicatorSnapshot>, PersistenceError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                "SELECT * FROM signal_analysis WHERE signal_id = ?1 ORDER BY id",
                signal_id,
                snapshot_from_row,
            )
        })
        .await
    }

    async fn divergences_for(&self, signal_id: i64) -> Result<Vec<Divergence>, PersistenceError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                "SELECT * FROM divergences WHERE signal_id = ?1 ORDER BY id",
                signal_id,
                divergence_from_row,
            )
        })
        .await
    }

    async fn recent_signals(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, PersistenceError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                "SELECT * FROM signals WHERE created_at >= ?1 ORDER BY created_at, id",
                since,
                signal_from_row,
            )
        })
        .await
    }

    async fn active_for_pair(&self, pair: &str) -> Result<Vec<Signal>, PersistenceError> {
        let pair = pair.to_string();
        self.with_conn(move |conn| {
            query_all(
                conn,
                "SELECT * FROM signals WHERE pair = ?1 AND status NOT IN ('rejected', 'expired') ORDER BY id",
                pair,
                signal_from_row,
            )
        })
        .await
    }

    async fn delete_signal(&self, signal_id: i64) -> Result<bool, PersistenceError> {
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM signals WHERE id = ?1", [signal_id])?;
            Ok(n > 0)
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, PersistenceError> {
        self.with_conn(|conn| {
            let mut stats = StoreStats::default();

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM signals GROUP BY status")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let status = SignalStatus::from_str_loose(&status)
                    .ok_or_else(|| corrupt("status", &status))?;
                stats.by_status.insert(status, count as usize);
                stats.total_signals += count as usize;
            }

            let count = |sql: &str| -> Result<usize, PersistenceError> {
                let n: Option<i64> = conn.query_row(sql, [], |r| r.get(0)).optional()?;
                Ok(n.unwrap_or(0) as usize)
            };
            stats.snapshots = count("SELECT COUNT(*) FROM signal_analysis")?;
            stats.divergences = count("SELECT COUNT(*) FROM divergences")?;
            Ok(stats)
        })
        .await
    }
}
