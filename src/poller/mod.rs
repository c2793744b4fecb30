//! Signal polling service.
//!
//! The poller periodically resolves a license key to its Expert Advisor,
//! fetches signals newer than the session watermark, and delivers them to
//! caller-supplied callbacks. Sustained failure suspends the session for a
//! cooldown, after which it resumes on its own.

mod service;

pub use service::{ErrorCallback, SignalCallback, SignalPoller};
