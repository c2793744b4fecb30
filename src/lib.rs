//! # Sigwatch - Trading Signal Polling Client
//!
//! A client that watches an Expert Advisor license for new trading signals.
//! Given a license key, it periodically resolves the license to an EA,
//! fetches signals newer than its watermark, and hands them to caller
//! callbacks.
//!
//! ## Architecture
//!
//! - **Poller**: Session lifecycle, the polling cycle, suspend/resume
//! - **API**: Signal service HTTP integration layer
//! - **State**: Signal records and session/state-machine types
//! - **Cache**: TTL-bounded cache for license resolutions
//! - **Config**: Configuration management

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod poller;
pub mod state;

pub use api::{HttpSignalApi, SignalApi};
pub use cache::TtlCache;
pub use config::Config;
pub use error::{Error, Result};
pub use poller::SignalPoller;
pub use state::{PollerState, PollerStatus, Signal, SignalResult, TradeAction};
