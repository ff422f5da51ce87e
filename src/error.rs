use thiserror::Error;

use crate::models::{Direction, SignalStatus, Timeframe};

/// Raised by the alert parser when the text does not follow the alert grammar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty alert text")]
    Empty,

    #[error("no #PAIR/QUOTE symbol in header")]
    MissingPair,

    #[error("no Long/Short direction marker")]
    MissingDirection,

    #[error("no xN leverage marker")]
    MissingLeverage,

    #[error("no Entry line")]
    MissingEntry,

    #[error("no take-profit levels")]
    MissingTakeProfits,

    #[error("invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("leverage x{leverage} outside [{min}, {max}]")]
    LeverageOutOfBounds { leverage: u32, min: u32, max: u32 },

    #[error("{field} must be a positive finite price, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("signal has no take-profit levels")]
    NoTakeProfits,

    #[error("take-profit #{index} at {price} breaks the {direction} ladder from entry {entry}")]
    LadderOrder {
        direction: Direction,
        index: usize,
        price: f64,
        entry: f64,
    },

    #[error("take-profit #{index} profit percent {percent} must be non-decreasing and within (0, 100]")]
    ProfitPercent { index: usize, percent: f64 },

    #[error("stop loss {stop_loss} is on the wrong side of entry {entry} for {direction}")]
    StopLossSide {
        direction: Direction,
        stop_loss: f64,
        entry: f64,
    },

    #[error("invalid status transition: from {from} to {to}")]
    InvalidTransition { from: SignalStatus, to: SignalStatus },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("data unavailable: need {required} bars, have {available}")]
    DataUnavailable { required: usize, available: usize },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("price fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("malformed price data: {0}")]
    Decode(String),

    #[error("no price data for {symbol} {timeframe}")]
    Unavailable { symbol: String, timeframe: Timeframe },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("signal {0} not found")]
    NotFound(i64),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database call timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("analysis for {pair} superseded by a newer signal")]
    Superseded { pair: String },

    #[error("failed to persist signal: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("signal cannot be analyzed: {0}")]
    Invalid(#[from] ValidationError),

    #[error("analysis task failed: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("config {field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}
