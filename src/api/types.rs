//! Wire types for the signal service, and conversion into state types.
//!
//! The request/response shapes belong to the remote service; nothing here is
//! interpreted beyond what the poller needs to hand signals to its caller.

use crate::error::Result;
use crate::state::{Signal, SignalResult, TradeAction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Response body of the license resolution endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EaResolutionResponse {
    /// The EA the license maps to; `null` when the license has none.
    pub ea_name: Option<String>,
}

/// Response body of the new-signals endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalsResponse {
    /// Signals newer than the requested `since`, oldest first.
    #[serde(default)]
    pub signals: Vec<RawSignal>,
}

/// A signal as the service serializes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignal {
    pub id: u64,
    pub ea_name: String,
    pub asset: String,
    pub action: String,
    pub price: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    /// Close time in epoch seconds, if closed.
    pub closed_at: Option<i64>,
    pub result: Option<String>,
}

/// Converts API responses to internal state types.
pub struct SignalConverter;

impl SignalConverter {
    /// Convert a wire signal into our internal Signal type.
    pub fn convert_signal(raw: RawSignal) -> Result<Signal> {
        Ok(Signal {
            id: raw.id.to_string(),
            ea_name: raw.ea_name,
            asset: raw.asset,
            action: Self::convert_action(&raw.action)?,
            price: Self::convert_price(raw.price)?,
            take_profit: raw.take_profit.map(Self::convert_price).transpose()?,
            stop_loss: raw.stop_loss.map(Self::convert_price).transpose()?,
            created_at: Self::convert_timestamp(raw.created_at),
            closed_at: raw.closed_at.map(Self::convert_timestamp),
            result: raw.result.as_deref().map_or(SignalResult::Open, Self::convert_result),
        })
    }

    fn convert_action(action: &str) -> Result<TradeAction> {
        match action.to_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown trade action '{other}'"
            ))),
        }
    }

    fn convert_result(result: &str) -> SignalResult {
        match result.to_uppercase().as_str() {
            "OPEN" | "" => SignalResult::Open,
            "WIN" | "PROFIT" => SignalResult::Win,
            "LOSS" => SignalResult::Loss,
            "BREAKEVEN" | "BE" => SignalResult::Breakeven,
            _ => SignalResult::Unknown,
        }
    }

    fn convert_price(value: f64) -> Result<Decimal> {
        Decimal::try_from(value)
            .map_err(|e| crate::Error::invalid_input(format!("Bad price {value}: {e}")))
    }

    fn convert_timestamp(epoch_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(epoch_secs, 0).unwrap_or_else(Utc::now)
    }
}
