//! Trading signal records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trade instruction produced by an Expert Advisor.
///
/// The poller treats these as opaque: fields are passed to the caller's
/// callback exactly as the signal service returned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal identifier.
    pub id: String,
    /// Name of the Expert Advisor that produced the signal.
    pub ea_name: String,
    /// Traded asset/symbol (e.g. "EURUSD").
    pub asset: String,
    /// Trade direction.
    pub action: TradeAction,
    /// Entry price.
    pub price: Decimal,
    /// Take-profit level, if set.
    pub take_profit: Option<Decimal>,
    /// Stop-loss level, if set.
    pub stop_loss: Option<Decimal>,
    /// When the signal was created.
    pub created_at: DateTime<Utc>,
    /// When the signal was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Outcome of the signal.
    pub result: SignalResult,
}

/// Direction of a trade signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    /// Open a long position.
    Buy,
    /// Open a short position.
    Sell,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Outcome status of a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalResult {
    /// The trade is still open.
    #[default]
    Open,
    /// Closed in profit.
    Win,
    /// Closed at a loss.
    Loss,
    /// Closed flat.
    Breakeven,
    /// The service reported a status we don't recognize.
    Unknown,
}

impl std::fmt::Display for SignalResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Win => write!(f, "Win"),
            Self::Loss => write!(f, "Loss"),
            Self::Breakeven => write!(f, "Breakeven"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Signal {
    /// Whether the signal's trade is still open.
    pub fn is_open(&self) -> bool {
        self.result == SignalResult::Open
    }
}
