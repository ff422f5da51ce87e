use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::SignalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Enter,
    Wait,
    Avoid,
    Exit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Enter => "ENTER",
            Action::Wait => "WAIT",
            Action::Avoid => "AVOID",
            Action::Exit => "EXIT",
        }
    }

    /// Lifecycle status a signal moves to once this action is decided.
    pub fn resulting_status(self) -> SignalStatus {
        match self {
            Action::Enter => SignalStatus::Confirmed,
            Action::Wait => SignalStatus::Analyzed,
            Action::Avoid => SignalStatus::Rejected,
            Action::Exit => SignalStatus::Expired,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    /// In [0, 1].
    pub confidence: f64,
    /// Net timeframe-weighted score aligned with the signal's direction, in [-1, 1].
    pub aligned_score: f64,
    pub rationale: String,
}
