//! Polling session state.

use chrono::{DateTime, Utc};

/// State machine for an active polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// The session is issuing cycles on its interval.
    Running,
    /// Too many consecutive failures; waiting out the cooldown.
    Suspended,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Suspended => write!(f, "Suspended"),
        }
    }
}

/// Mutable state owned by a session's timer task.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// License key this session polls for.
    pub license_key: String,
    /// Resolved Expert Advisor identifier, once known.
    pub ea_name: Option<String>,
    /// Timestamp of the last successful poll; lower bound for the next fetch.
    /// Only advances forward, and only after a successful cycle.
    pub watermark: DateTime<Utc>,
    /// Consecutive failed cycles. Reset to zero on any success; reaching the
    /// configured threshold is the sole trigger for suspension.
    pub consecutive_errors: u32,
    /// Generation tag; results from an older generation are never applied.
    pub generation: u64,
    /// Current state machine position.
    pub state: PollerState,
    /// Completed cycles (successful or not).
    pub cycles_completed: u64,
    /// Signals delivered to the callback so far.
    pub signals_delivered: u64,
}

impl SessionState {
    /// Create session state for a fresh `start_polling` call.
    pub fn new(license_key: impl Into<String>, watermark: DateTime<Utc>, generation: u64) -> Self {
        Self {
            license_key: license_key.into(),
            ea_name: None,
            watermark,
            consecutive_errors: 0,
            generation,
            state: PollerState::Running,
            cycles_completed: 0,
            signals_delivered: 0,
        }
    }

    /// Record a successful cycle: reset the error counter and advance the
    /// watermark. A watermark in the past is ignored so the value never
    /// moves backwards.
    pub fn record_success(&mut self, completed_at: DateTime<Utc>, delivered: usize) {
        self.consecutive_errors = 0;
        if completed_at > self.watermark {
            self.watermark = completed_at;
        }
        self.cycles_completed += 1;
        self.signals_delivered += delivered as u64;
    }

    /// Record a failed cycle and report the new consecutive-error count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.cycles_completed += 1;
        self.consecutive_errors
    }

    /// Take a read-only snapshot for introspection.
    pub fn snapshot(&self) -> PollerStatus {
        PollerStatus {
            running: true,
            state: Some(self.state),
            license_key: Some(self.license_key.clone()),
            ea_name: self.ea_name.clone(),
            watermark: Some(self.watermark),
            consecutive_errors: self.consecutive_errors,
            cycles_completed: self.cycles_completed,
            signals_delivered: self.signals_delivered,
        }
    }
}

/// Read-only snapshot of the poller, safe to hand to callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerStatus {
    /// Whether a session exists.
    pub running: bool,
    /// State machine position, if running.
    pub state: Option<PollerState>,
    /// License key of the active session.
    pub license_key: Option<String>,
    /// Resolved EA identifier, if resolution has happened.
    pub ea_name: Option<String>,
    /// Last-successful-poll watermark.
    pub watermark: Option<DateTime<Utc>>,
    /// Consecutive failed cycles.
    pub consecutive_errors: u32,
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Signals delivered so far.
    pub signals_delivered: u64,
}
