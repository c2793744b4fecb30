//! The signal poller and its session task.

use crate::api::SignalApi;
use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::{PollerState, PollerStatus, SessionState, Signal};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Callback invoked once per delivered signal.
pub type SignalCallback = Arc<dyn Fn(Signal) + Send + Sync>;

/// Callback invoked with a description of each failed cycle.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// License-to-EA resolutions, shared across sessions.
type ResolutionCache = Arc<Mutex<TtlCache<String, Option<String>>>>;

/// Periodically discovers new trading signals for a license and delivers
/// them via callback.
///
/// At most one session is active per poller. The session owns a single timer
/// task; `stop_polling` cancels it and no state from a stopped session ever
/// reaches a later one.
pub struct SignalPoller {
    /// Remote collaborators (license resolution + signal lookup).
    api: Arc<dyn SignalApi>,
    /// Configuration.
    config: Config,
    /// Whether real remote calls are made.
    enabled: AtomicBool,
    /// Monotonic session generation counter.
    generation: Arc<AtomicU64>,
    /// TTL cache of license-to-EA resolutions.
    resolutions: ResolutionCache,
    /// Active session, if any.
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    task: Option<JoinHandle<()>>,
    shared: Option<Arc<RwLock<SessionState>>>,
}

impl SignalPoller {
    /// Create a new poller over the given API.
    pub fn new(api: Arc<dyn SignalApi>, config: Config) -> Self {
        let resolutions = Arc::new(Mutex::new(TtlCache::new(
            config.poller.resolution_ttl(),
            config.poller.resolution_cache_capacity,
        )));

        Self {
            api,
            config,
            enabled: AtomicBool::new(true),
            generation: Arc::new(AtomicU64::new(0)),
            resolutions,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Allow remote calls again after a `disable`.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Poller enabled");
    }

    /// Stop making remote calls and tear down any active session.
    pub async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stop_polling().await;
        info!("Poller disabled");
    }

    /// Whether remote calls are currently allowed.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start polling for the given license key.
    ///
    /// Idempotent: if a session is already running this is a no-op. The
    /// first cycle runs immediately; subsequent cycles run on the configured
    /// interval. `on_signal_found` is invoked once per signal, in the order
    /// the service returned them; `on_error` is invoked once per failed
    /// cycle.
    pub async fn start_polling<F, E>(
        &self,
        license_key: impl Into<String>,
        on_signal_found: F,
        on_error: E,
    ) -> Result<()>
    where
        F: Fn(Signal) + Send + Sync + 'static,
        E: Fn(String) + Send + Sync + 'static,
    {
        let license_key = license_key.into();
        if license_key.is_empty() {
            return Err(Error::invalid_input("License key must not be empty"));
        }

        if !self.is_enabled() {
            info!("Poller is disabled; not starting a session");
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        if let Some(task) = &inner.task {
            if !task.is_finished() {
                debug!("Polling already running; start ignored");
                return Ok(());
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watermark = Utc::now() - self.config.poller.initial_lookback();
        let shared = Arc::new(RwLock::new(SessionState::new(
            license_key.clone(),
            watermark,
            generation,
        )));

        let runner = SessionRunner {
            api: Arc::clone(&self.api),
            config: self.config.clone(),
            resolutions: Arc::clone(&self.resolutions),
            shared: Arc::clone(&shared),
            live_generation: Arc::clone(&self.generation),
            generation,
            on_signal_found: Arc::new(on_signal_found),
            on_error: Arc::new(on_error),
        };

        info!(license_key = %license_key, "Started polling");
        inner.task = Some(tokio::spawn(runner.run()));
        inner.shared = Some(shared);
        Ok(())
    }

    /// Cancel the timer task and clear all session state.
    ///
    /// Always safe to call, including when not running.
    pub async fn stop_polling(&self) {
        // Invalidate any in-flight cycle before tearing the task down.
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task.take() {
            task.abort();
            info!("Stopped polling");
        }
        inner.shared = None;
    }

    /// Whether a session is currently active.
    pub async fn is_running(&self) -> bool {
        let inner = self.inner.lock().await;
        inner
            .task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Read-only snapshot of the current session, default when idle.
    pub async fn status(&self) -> PollerStatus {
        let inner = self.inner.lock().await;
        match &inner.shared {
            Some(shared) => shared.read().await.snapshot(),
            None => PollerStatus::default(),
        }
    }
}

/// Outcome of a single completed cycle.
enum CycleOutcome {
    /// Signals fetched and delivered (possibly zero).
    Delivered(usize),
    /// The license resolved to no EA; nothing to fetch.
    NoEa,
}

/// State moved into the session's timer task.
struct SessionRunner {
    api: Arc<dyn SignalApi>,
    config: Config,
    resolutions: ResolutionCache,
    shared: Arc<RwLock<SessionState>>,
    live_generation: Arc<AtomicU64>,
    generation: u64,
    on_signal_found: SignalCallback,
    on_error: ErrorCallback,
}

impl SessionRunner {
    /// Drive cycles until the task is aborted. Cycles are awaited in place,
    /// so two cycles of the same session can never overlap.
    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.poller.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.run_cycle().await {
                Ok(CycleOutcome::Delivered(count)) => {
                    debug!(signals = count, "Cycle completed");
                }
                Ok(CycleOutcome::NoEa) => {
                    debug!("No EA found for license; cycle abandoned");
                }
                Err(e) => {
                    let errors = {
                        let mut session = self.shared.write().await;
                        session.record_failure()
                    };
                    warn!(consecutive_errors = errors, "Cycle failed: {e}");
                    if self.is_current() {
                        (self.on_error)(e.to_string());
                    }

                    if errors >= self.config.poller.max_consecutive_errors {
                        self.suspend().await;
                        // Resume with an immediate attempt, then fall back
                        // to the regular interval.
                        interval.reset_immediately();
                    }
                }
            }
        }
    }

    /// One polling cycle: resolve the EA (cached), fetch signals since the
    /// watermark, deliver them, advance the watermark.
    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let (license_key, since) = {
            let session = self.shared.read().await;
            (session.license_key.clone(), session.watermark)
        };

        let ea_name = match self.resolve_cached(&license_key).await? {
            Some(ea_name) => ea_name,
            None => return Ok(CycleOutcome::NoEa),
        };

        {
            let mut session = self.shared.write().await;
            session.ea_name = Some(ea_name.clone());
        }

        let timeout = self.config.api.timeout();
        let signals = tokio::time::timeout(timeout, self.api.fetch_signals(&ea_name, since))
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))?
            .map_err(|e| match e {
                e @ (Error::Fetch(_) | Error::Timeout(_)) => e,
                other => Error::fetch(other.to_string()),
            })?;

        if !self.is_current() {
            debug!("Session superseded; discarding fetched signals");
            return Ok(CycleOutcome::Delivered(0));
        }

        let delivered = signals.len();
        for signal in signals {
            (self.on_signal_found)(signal);
        }

        let mut session = self.shared.write().await;
        session.record_success(Utc::now(), delivered);
        Ok(CycleOutcome::Delivered(delivered))
    }

    /// Resolve a license to its EA through the TTL cache. Resolved "no EA"
    /// outcomes are cached too, so a dead license is not re-resolved every
    /// cycle.
    async fn resolve_cached(&self, license_key: &str) -> Result<Option<String>> {
        let key = license_key.to_string();
        {
            let cache = self.resolutions.lock().await;
            if let Some(cached) = cache.get(&key) {
                debug!(license_key, "Resolution cache hit");
                return Ok(cached);
            }
        }

        let resolved = self.api.resolve_ea(license_key).await.map_err(|e| match e {
            e @ Error::Resolution(_) => e,
            other => Error::resolution(other.to_string()),
        })?;

        let mut cache = self.resolutions.lock().await;
        cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Sit out the cooldown in the `Suspended` state, then reset the error
    /// counter and return to `Running` with the same license and callbacks.
    async fn suspend(&self) {
        let cooldown = self.config.poller.cooldown();
        {
            let mut session = self.shared.write().await;
            session.state = PollerState::Suspended;
            warn!(
                license_key = %session.license_key,
                cooldown_secs = cooldown.as_secs(),
                "Too many consecutive failures; suspending poller"
            );
        }

        tokio::time::sleep(cooldown).await;

        let mut session = self.shared.write().await;
        session.consecutive_errors = 0;
        session.state = PollerState::Running;
        info!(license_key = %session.license_key, "Cooldown elapsed; resuming polling");
    }

    /// Whether this session is still the poller's live one.
    fn is_current(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockSignalApi;
    use crate::state::{SignalResult, TradeAction};
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn make_signal(id: &str, action: TradeAction) -> Signal {
        Signal {
            id: id.to_string(),
            ea_name: "MockEA".to_string(),
            asset: "EURUSD".to_string(),
            action,
            price: dec!(1.0850),
            take_profit: Some(dec!(1.0900)),
            stop_loss: Some(dec!(1.0800)),
            created_at: Utc::now(),
            closed_at: None,
            result: SignalResult::Open,
        }
    }

    struct Recorder {
        signals: Arc<StdMutex<Vec<Signal>>>,
        errors: Arc<StdMutex<Vec<String>>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                signals: Arc::new(StdMutex::new(Vec::new())),
                errors: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn callbacks(&self) -> (impl Fn(Signal) + Send + Sync, impl Fn(String) + Send + Sync) {
            let signals = Arc::clone(&self.signals);
            let errors = Arc::clone(&self.errors);
            (
                move |signal| signals.lock().unwrap().push(signal),
                move |message| errors.lock().unwrap().push(message),
            )
        }

        fn signal_ids(&self) -> Vec<String> {
            self.signals.lock().unwrap().iter().map(|s| s.id.clone()).collect()
        }

        fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    fn poller_with(api: MockSignalApi, config: Config) -> SignalPoller {
        SignalPoller::new(Arc::new(api), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_delivers_signals_in_order() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .withf(|key| key == "ABC123")
            .times(1)
            .returning(|_| Ok(Some("MockEA".to_string())));
        api.expect_fetch_signals()
            .withf(|ea_name, _| ea_name == "MockEA")
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    make_signal("buy-1", TradeAction::Buy),
                    make_signal("sell-2", TradeAction::Sell),
                ])
            });

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();

        let before = Utc::now();
        assert_ok!(poller.start_polling("ABC123", on_signal, on_error).await);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let actions: Vec<TradeAction> = recorder
            .signals
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.action)
            .collect();
        assert_eq!(actions, vec![TradeAction::Buy, TradeAction::Sell]);
        assert_eq!(recorder.error_count(), 0);

        let status = poller.status().await;
        assert!(status.running);
        assert_eq!(status.state, Some(PollerState::Running));
        assert_eq!(status.ea_name.as_deref(), Some("MockEA"));
        assert_eq!(status.consecutive_errors, 0);
        assert_eq!(status.signals_delivered, 2);
        // Watermark advanced from the one-hour lookback to the cycle's
        // completion time.
        assert!(status.watermark.unwrap() >= before);

        poller.stop_polling().await;
        assert!(!poller.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_twice_is_noop() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .times(1)
            .returning(|_| Ok(Some("MockEA".to_string())));
        api.expect_fetch_signals()
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();

        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();

        // Second start while running must not spawn a second timer.
        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(poller.is_running().await);

        poller.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_cache_reused_across_cycles() {
        // Three cycles inside the 5-minute TTL: the license is resolved
        // once, then served from the cache. Expiry timing itself is covered
        // by the TtlCache tests with an explicit clock.
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .withf(|key| key == "ABC123")
            .times(1)
            .returning(|_| Ok(Some("MockEA".to_string())));
        api.expect_fetch_signals()
            .times(3)
            .returning(|_, _| Ok(vec![]));

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        poller.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watermark_is_the_since_of_the_next_fetch() {
        let sinces: Arc<StdMutex<Vec<DateTime<Utc>>>> = Arc::new(StdMutex::new(Vec::new()));
        let sinces_in_mock = Arc::clone(&sinces);

        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .returning(|_| Ok(Some("MockEA".to_string())));
        api.expect_fetch_signals()
            .times(2)
            .returning(move |_, since| {
                sinces_in_mock.lock().unwrap().push(since);
                Ok(vec![])
            });

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();

        let started = Utc::now();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        poller.stop_polling().await;

        let sinces = sinces.lock().unwrap();
        assert_eq!(sinces.len(), 2);
        // First fetch looks back an hour from session start; the second uses
        // the advanced watermark.
        assert!(sinces[0] < started);
        assert!(sinces[1] >= started);
        assert!(sinces[1] > sinces[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ea_abandons_cycle_without_error() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .times(1)
            .returning(|_| Ok(None));
        api.expect_fetch_signals().times(0);

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();

        let before = Utc::now();
        poller
            .start_polling("NOKEY", on_signal, on_error)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(recorder.error_count(), 0);
        let status = poller.status().await;
        assert_eq!(status.state, Some(PollerState::Running));
        assert_eq!(status.consecutive_errors, 0);
        assert_eq!(status.ea_name, None);
        // Watermark untouched: still the pre-start lookback value.
        assert!(status.watermark.unwrap() < before);

        poller.stop_polling().await;
    }

    /// Resolves normally but never completes a fetch.
    struct HangingFetchApi;

    #[async_trait::async_trait]
    impl SignalApi for HangingFetchApi {
        async fn resolve_ea(&self, _license_key: &str) -> Result<Option<String>> {
            Ok(Some("MockEA".to_string()))
        }

        async fn fetch_signals(&self, _ea_name: &str, _since: DateTime<Utc>) -> Result<Vec<Signal>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out_and_counts_as_failure() {
        let poller = SignalPoller::new(Arc::new(HangingFetchApi), Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();

        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();
        // The fetch never returns; the 10-second bound cuts it off.
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(recorder.signal_ids().is_empty());
        assert_eq!(recorder.error_count(), 1);
        assert!(recorder.errors.lock().unwrap()[0].contains("timed out"));

        let status = poller.status().await;
        assert_eq!(status.consecutive_errors, 1);
        // One timeout is short of the threshold; the session stays running.
        assert_eq!(status.state, Some(PollerState::Running));

        poller.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspends_after_threshold_and_resumes_automatically() {
        // Failures at t=0, 30, 60 hit the threshold of 3; the poller then
        // sleeps the 300s cooldown and retries at t=360 without any new
        // start_polling call.
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .withf(|key| key == "ABC123")
            .times(4)
            .returning(|_| Err(Error::resolution("license service down")));
        api.expect_fetch_signals().times(0);

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(recorder.error_count(), 3);
        let status = poller.status().await;
        assert_eq!(status.state, Some(PollerState::Suspended));
        assert_eq!(status.consecutive_errors, 3);

        // Deep into the cooldown: still suspended, no further attempts.
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(recorder.error_count(), 3);
        assert_eq!(
            poller.status().await.state,
            Some(PollerState::Suspended)
        );

        // Past the cooldown: a fourth attempt happened automatically and the
        // counter restarted from zero before it.
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(recorder.error_count(), 4);
        let status = poller.status().await;
        assert_eq!(status.state, Some(PollerState::Running));
        assert_eq!(status.consecutive_errors, 1);
        assert_eq!(status.license_key.as_deref(), Some("ABC123"));

        poller.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_start_with_new_key_delivers_nothing_stale() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .withf(|key| key == "OLD")
            .times(0..)
            .returning(|_| Ok(Some("OldEA".to_string())));
        api.expect_fetch_signals()
            .withf(|ea_name, _| ea_name == "OldEA")
            .times(0..)
            .returning(|_, _| Ok(vec![make_signal("old-1", TradeAction::Buy)]));
        api.expect_resolve_ea()
            .withf(|key| key == "NEW")
            .times(1)
            .returning(|_| Ok(Some("NewEA".to_string())));
        api.expect_fetch_signals()
            .withf(|ea_name, _| ea_name == "NewEA")
            .times(1)
            .returning(|_, _| {
                let mut signal = make_signal("new-1", TradeAction::Sell);
                signal.ea_name = "NewEA".to_string();
                Ok(vec![signal])
            });

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();

        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("OLD", on_signal, on_error)
            .await
            .unwrap();
        poller.stop_polling().await;

        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("NEW", on_signal, on_error)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(recorder.signal_ids(), vec!["new-1".to_string()]);
        assert_eq!(
            poller.status().await.license_key.as_deref(),
            Some("NEW")
        );

        poller.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_disabled_is_noop() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea().times(0);
        api.expect_fetch_signals().times(0);

        let poller = poller_with(api, Config::default());
        poller.disable().await;

        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!poller.is_running().await);
        assert_eq!(poller.status().await, PollerStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_stops_active_session() {
        let mut api = MockSignalApi::new();
        api.expect_resolve_ea()
            .returning(|_| Ok(Some("MockEA".to_string())));
        api.expect_fetch_signals().returning(|_, _| Ok(vec![]));

        let poller = poller_with(api, Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();
        poller
            .start_polling("ABC123", on_signal, on_error)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(poller.is_running().await);

        poller.disable().await;
        assert!(!poller.is_running().await);
        assert!(!poller.is_enabled());

        // enable() alone does not restart anything.
        poller.enable();
        assert!(!poller.is_running().await);
    }

    #[tokio::test]
    async fn test_empty_license_key_is_rejected() {
        let poller = poller_with(MockSignalApi::new(), Config::default());
        let recorder = Recorder::new();
        let (on_signal, on_error) = recorder.callbacks();

        let result = poller.start_polling("", on_signal, on_error).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(!poller.is_running().await);
    }
}
