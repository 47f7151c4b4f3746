//! Network reachability monitor.
//!
//! Tracks whether the client is online from two inputs: edge-triggered
//! platform events and, while offline, a periodic active probe. The probe
//! lets the monitor recover when the platform signal lags reality (captive
//! portals, flaky adapters). Downtime is accumulated on every transition back
//! online.

pub mod probe;

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Connectivity;
use crate::subscription::{lock, SubscriptionId, Subscribers};

pub use probe::{probe_with_timeout, HttpProbe, ProbeError, ReachabilityProbe};

/// Configuration for the active probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// How often to probe while offline.
    /// Default: 10 seconds
    pub interval: Duration,
    /// Hard timeout for a single probe.
    /// Default: 5 seconds
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time between reachability checks while offline.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Hard timeout for a single check.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Platform-level connectivity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    Online,
    Offline,
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionSource {
    Platform,
    Probe,
}

/// Snapshot of the monitor's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub is_online: bool,
    /// What the platform last reported; may disagree with `is_online` after a
    /// successful probe.
    pub platform_online: bool,
    /// Set while offline; cleared on the transition back online.
    pub last_offline_at: Option<DateTime<Utc>>,
    pub cumulative_downtime: Duration,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            is_online: true,
            platform_online: true,
            last_offline_at: None,
            cumulative_downtime: Duration::ZERO,
        }
    }
}

/// A change between online and offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkTransition {
    pub is_online: bool,
    pub source: TransitionSource,
    pub at: DateTime<Utc>,
    /// Length of the outage that just ended. Only set when coming online.
    pub downtime: Option<Duration>,
}

/// Callback invoked on every transition.
pub type TransitionCallback = dyn Fn(&NetworkTransition) + Send + Sync;

struct MonitorState {
    snapshot: NetworkState,
    offline_since: Option<Instant>,
}

/// The running probe loop, if any. Each loop is spawned with the generation
/// it was stored under, so it can tell whether the slot still refers to it.
#[derive(Default)]
struct ProbeSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl ProbeSlot {
    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct Inner {
    config: ProbeConfig,
    probe: Arc<dyn ReachabilityProbe>,
    /// Lock order: `state` before `probe_task`. The slot only changes together
    /// with a transition, under the state lock.
    state: Mutex<MonitorState>,
    listeners: Mutex<Subscribers<TransitionCallback>>,
    probe_task: Mutex<ProbeSlot>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        lock(&self.probe_task).stop();
    }
}

/// Tracks connectivity. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Connectivity for NetworkMonitor {
    fn is_offline(&self) -> bool {
        !self.is_online()
    }
}

impl NetworkMonitor {
    /// Creates a monitor that starts online.
    pub fn new(config: ProbeConfig, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                state: Mutex::new(MonitorState {
                    snapshot: NetworkState::default(),
                    offline_since: None,
                }),
                listeners: Mutex::new(Subscribers::new()),
                probe_task: Mutex::new(ProbeSlot::default()),
            }),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> NetworkState {
        lock(&self.inner.state).snapshot.clone()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.inner.state).snapshot.is_online
    }

    /// Registers a transition callback.
    pub fn subscribe(
        &self,
        callback: impl Fn(&NetworkTransition) + Send + Sync + 'static,
    ) -> SubscriptionId {
        lock(&self.inner.listeners).insert(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.listeners).remove(id)
    }

    /// Feeds a platform online/offline event.
    ///
    /// Repeated events for the current state only refresh the platform flag.
    pub fn handle_platform_event(&self, signal: PlatformSignal) {
        let transition = {
            let mut state = lock(&self.inner.state);
            state.snapshot.platform_online = signal == PlatformSignal::Online;
            match (signal, state.snapshot.is_online) {
                (PlatformSignal::Offline, true) => {
                    let transition = go_offline(&mut state);
                    self.start_probe_loop();
                    Some(transition)
                }
                (PlatformSignal::Online, false) => {
                    let transition = go_online(&mut state, TransitionSource::Platform);
                    lock(&self.inner.probe_task).stop();
                    Some(transition)
                }
                _ => None,
            }
        };

        if let Some(transition) = transition {
            self.inner.publish(&transition);
        }
    }

    /// Runs one probe right away. Flips the monitor online if it succeeds
    /// while offline. Returns whether the probe succeeded.
    pub async fn check_now(&self) -> bool {
        let reachable = self.inner.run_probe().await;
        if reachable {
            self.inner.mark_online_from_probe(None);
        }
        reachable
    }

    /// Stops the background probe. The monitor keeps accepting platform
    /// events and will restart the probe on the next offline transition.
    pub fn shutdown(&self) {
        lock(&self.inner.probe_task).stop();
    }

    /// Returns true while the background probe task is running.
    pub fn is_probing(&self) -> bool {
        lock(&self.inner.probe_task)
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Replaces the probe loop. Called with the state lock held.
    fn start_probe_loop(&self) {
        let mut slot = lock(&self.inner.probe_task);
        slot.stop();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available; offline probe disabled");
                return;
            }
        };

        slot.generation += 1;
        let weak = Arc::downgrade(&self.inner);
        slot.handle = Some(runtime.spawn(probe_loop(
            weak,
            self.inner.config.interval,
            slot.generation,
        )));
    }
}

impl Inner {
    async fn run_probe(&self) -> bool {
        match probe_with_timeout(self.probe.as_ref(), self.config.timeout).await {
            Ok(()) => true,
            Err(error) => {
                debug!(error = %error, "Reachability probe failed");
                false
            }
        }
    }

    /// Flips the state online after a successful probe and retires the
    /// current offline period's loop. `caller` is the generation of the loop
    /// making the call, if any; that loop is detached rather than aborted
    /// since it is about to return. Returns true if this call flipped the
    /// state.
    fn mark_online_from_probe(&self, caller: Option<u64>) -> bool {
        let transition = {
            let mut state = lock(&self.state);
            if state.snapshot.is_online {
                return false;
            }
            let transition = go_online(&mut state, TransitionSource::Probe);

            let mut slot = lock(&self.probe_task);
            if caller == Some(slot.generation) {
                slot.handle.take();
            } else {
                slot.stop();
            }
            transition
        };
        self.publish(&transition);
        true
    }

    fn publish(&self, transition: &NetworkTransition) {
        let listeners = lock(&self.listeners).snapshot();
        for (_, listener) in listeners {
            listener(transition);
        }
    }
}

async fn probe_loop(inner: Weak<Inner>, interval: Duration, generation: u64) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if lock(&inner.state).snapshot.is_online {
            break;
        }

        if inner.run_probe().await {
            if inner.mark_online_from_probe(Some(generation)) {
                info!("Probe succeeded while platform reports offline; treating client as online");
            }
            break;
        }
    }
}

fn go_offline(state: &mut MonitorState) -> NetworkTransition {
    let now = Utc::now();
    state.snapshot.is_online = false;
    state.snapshot.last_offline_at = Some(now);
    state.offline_since = Some(Instant::now());

    warn!("Client went offline");
    NetworkTransition {
        is_online: false,
        source: TransitionSource::Platform,
        at: now,
        downtime: None,
    }
}

fn go_online(state: &mut MonitorState, source: TransitionSource) -> NetworkTransition {
    let downtime = state
        .offline_since
        .take()
        .map(|since| since.elapsed())
        .unwrap_or_default();

    state.snapshot.is_online = true;
    state.snapshot.last_offline_at = None;
    state.snapshot.cumulative_downtime += downtime;

    info!(
        downtime_ms = downtime.as_millis() as u64,
        source = ?source,
        "Client is back online"
    );
    NetworkTransition {
        is_online: true,
        source,
        at: Utc::now(),
        downtime: Some(downtime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Fails until `succeed` is set; counts calls.
    #[derive(Default)]
    struct ScriptedProbe {
        succeed: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReachabilityProbe for ScriptedProbe {
        async fn probe(&self) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProbeError::Other("unreachable".to_string()))
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl ReachabilityProbe for HangingProbe {
        async fn probe(&self) -> Result<(), ProbeError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn monitor_with(probe: Arc<dyn ReachabilityProbe>) -> NetworkMonitor {
        NetworkMonitor::new(ProbeConfig::default(), probe)
    }

    fn recorded(monitor: &NetworkMonitor) -> Arc<Mutex<Vec<NetworkTransition>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.subscribe(move |t| sink.lock().unwrap().push(t.clone()));
        seen
    }

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_starts_online() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));
        let state = monitor.state();
        assert!(state.is_online);
        assert!(state.platform_online);
        assert_eq!(state.last_offline_at, None);
        assert_eq!(state.cumulative_downtime, Duration::ZERO);
        assert!(!monitor.is_offline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_transitions_and_downtime() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));
        let seen = recorded(&monitor);

        monitor.handle_platform_event(PlatformSignal::Offline);
        assert!(!monitor.is_online());
        assert!(monitor.state().last_offline_at.is_some());
        assert!(monitor.is_probing());

        tokio::time::advance(Duration::from_secs(3)).await;
        monitor.handle_platform_event(PlatformSignal::Online);

        let state = monitor.state();
        assert!(state.is_online);
        assert_eq!(state.last_offline_at, None);
        assert_eq!(state.cumulative_downtime, Duration::from_secs(3));
        assert!(!monitor.is_probing());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].is_online);
        assert!(seen[1].is_online);
        assert_eq!(seen[1].source, TransitionSource::Platform);
        assert_eq!(seen[1].downtime, Some(Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_events_are_edge_triggered() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));
        let seen = recorded(&monitor);

        monitor.handle_platform_event(PlatformSignal::Online);
        monitor.handle_platform_event(PlatformSignal::Offline);
        monitor.handle_platform_event(PlatformSignal::Offline);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_recovers_while_platform_reports_offline() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor_with(probe.clone());
        let seen = recorded(&monitor);

        monitor.handle_platform_event(PlatformSignal::Offline);

        // Two failed probes at 10s and 20s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(!monitor.is_online());

        probe.succeed.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let state = monitor.state();
        assert!(state.is_online);
        assert!(!state.platform_online);
        assert_eq!(state.last_offline_at, None);
        assert_eq!(state.cumulative_downtime, Duration::from_secs(30));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().map(|t| t.source), Some(TransitionSource::Probe));
        assert!(!monitor.is_probing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_only_runs_while_offline() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor_with(probe.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        monitor.handle_platform_event(PlatformSignal::Offline);
        tokio::time::sleep(Duration::from_secs(15)).await;
        monitor.handle_platform_event(PlatformSignal::Online);
        let calls = probe.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out_and_keeps_offline() {
        let monitor = monitor_with(Arc::new(HangingProbe));
        monitor.handle_platform_event(PlatformSignal::Offline);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(!monitor.is_online());
        assert!(monitor.is_probing());
        monitor.shutdown();
        assert!(!monitor.is_probing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_downtime_accumulates_across_outages() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));

        for secs in [2, 5] {
            monitor.handle_platform_event(PlatformSignal::Offline);
            tokio::time::advance(Duration::from_secs(secs)).await;
            monitor.handle_platform_event(PlatformSignal::Online);
        }

        assert_eq!(monitor.state().cumulative_downtime, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_check_now_flips_online() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor_with(probe.clone());
        monitor.handle_platform_event(PlatformSignal::Offline);

        assert!(!monitor.check_now().await);
        assert!(!monitor.is_online());

        probe.succeed.store(true, Ordering::SeqCst);
        assert!(monitor.check_now().await);
        assert!(monitor.is_online());
        assert!(!monitor.is_probing());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_callbacks() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let id = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.handle_platform_event(PlatformSignal::Offline);
        assert!(monitor.unsubscribe(id));
        monitor.handle_platform_event(PlatformSignal::Online);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Reports a platform Online then Offline while its first probe is in
    /// flight, then succeeds.
    #[derive(Default)]
    struct FlappingProbe {
        monitor: Mutex<Option<NetworkMonitor>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReachabilityProbe for FlappingProbe {
        async fn probe(&self) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let monitor = self.monitor.lock().unwrap().take();
            if let Some(monitor) = monitor {
                monitor.handle_platform_event(PlatformSignal::Online);
                monitor.handle_platform_event(PlatformSignal::Offline);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_during_probe_leaves_no_orphaned_loop() {
        let probe = Arc::new(FlappingProbe::default());
        let monitor = monitor_with(probe.clone());
        *probe.monitor.lock().unwrap() = Some(monitor.clone());

        monitor.handle_platform_event(PlatformSignal::Offline);
        tokio::time::sleep(Duration::from_secs(11)).await;

        monitor.handle_platform_event(PlatformSignal::Offline);
        monitor.shutdown();
        assert!(!monitor.is_probing());

        let calls = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_keeps_loop_of_later_outage() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor_with(probe.clone());
        monitor.handle_platform_event(PlatformSignal::Offline);

        probe.succeed.store(true, Ordering::SeqCst);
        assert!(monitor.check_now().await);
        assert!(!monitor.is_probing());

        // A later outage gets its own loop that a stale success cannot stop.
        probe.succeed.store(false, Ordering::SeqCst);
        monitor.handle_platform_event(PlatformSignal::Offline);
        assert!(!monitor.check_now().await);
        assert!(monitor.is_probing());

        monitor.shutdown();
        assert!(!monitor.is_probing());
    }

    #[test]
    fn test_offline_without_runtime_does_not_panic() {
        let monitor = monitor_with(Arc::new(ScriptedProbe::default()));
        monitor.handle_platform_event(PlatformSignal::Offline);
        assert!(!monitor.is_online());
        assert!(!monitor.is_probing());
    }
}
