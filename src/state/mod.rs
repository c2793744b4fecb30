//! State types for sigwatch.
//!
//! This module holds the domain records the poller delivers and the
//! session/state-machine types that describe a running poller.

mod session;
mod signal;

pub use session::{PollerState, PollerStatus, SessionState};
pub use signal::{Signal, SignalResult, TradeAction};
