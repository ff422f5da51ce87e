use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

use crate::error::ValidationError;
use crate::models::Direction;

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    /// Share of the profit target this level realizes, in (0, 100].
    pub profit_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Received,
    Analyzed,
    Confirmed,
    Rejected,
    Expired,
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SignalStatus {
    pub const ALL: [SignalStatus; 5] = [
        SignalStatus::Received,
        SignalStatus::Analyzed,
        SignalStatus::Confirmed,
        SignalStatus::Rejected,
        SignalStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Received => "received",
            SignalStatus::Analyzed => "analyzed",
            SignalStatus::Confirmed => "confirmed",
            SignalStatus::Rejected => "rejected",
            SignalStatus::Expired => "expired",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<SignalStatus> {
        SignalStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SignalStatus::Rejected | SignalStatus::Expired)
    }

    /// received -> analyzed -> confirmed / rejected / expired.
    /// A received signal may be rejected or expired without analysis,
    /// analyzed and confirmed signals may be re-analyzed.
    pub fn can_transition_to(self, to: SignalStatus) -> bool {
        use SignalStatus::*;
        match (self, to) {
            (Received, Analyzed | Rejected | Expired) => true,
            (Analyzed, Analyzed | Confirmed | Rejected | Expired) => true,
            (Confirmed, Confirmed | Expired) => true,
            _ => false,
        }
    }
}

/// A parsed trade alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub pair: String,
    pub direction: Direction,
    pub leverage: u32,
    pub entry_price: f64,
    pub take_profits: Vec<TakeProfit>,
    pub stop_loss: Option<f64>,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub raw_text: String,
    pub analysis_summary: Option<String>,
}

impl Signal {
    pub fn tp_prices(&self) -> Vec<f64> {
        self.take_profits.iter().map(|tp| tp.price).collect()
    }

    pub fn transition(
        &mut self,
        to: SignalStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(to) {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }
}

/// A signal that passed validation. Only the parser can build one, so
/// downstream stages never re-check the ladder or leverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSignal(Signal);

impl ValidSignal {
    pub(crate) fn new_unchecked(signal: Signal) -> Self {
        Self(signal)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.0.id = Some(id);
        self
    }

    pub fn signal(&self) -> &Signal {
        &self.0
    }

    pub fn into_inner(self) -> Signal {
        self.0
    }
}

impl Deref for ValidSignal {
    type Target = Signal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
