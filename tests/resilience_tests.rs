//! End-to-end tests wiring the components through the public API.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilix::config::ResilienceConfig;
use resilix::context::NoProbe;
use resilix::dispatch::ReportOptions;
use resilix::error::{ErrorKind, RawFailure, Severity, TransportFailure};
use resilix::network::{NetworkMonitor, PlatformSignal, ProbeConfig, ProbeError, ReachabilityProbe};
use resilix::notification::{NotificationState, OFFLINE_NOTIFICATION_ID};
use resilix::retry::{with_retry, RetryOptions};
use resilix::Resilience;
use tokio::time::Instant;

struct SwitchProbe(AtomicBool);

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Other("unreachable".to_string()))
        }
    }
}

fn quiet() -> ReportOptions {
    ReportOptions::new().suppress_log()
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_failures() {
    let calls = AtomicU32::new(0);
    let retries = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&retries);

    let options = RetryOptions::new()
        .with_jitter(false)
        .with_on_retry(move |attempt, _| seen.lock().unwrap().push(attempt));

    let start = Instant::now();
    let result = with_retry(&options, || async {
        match calls.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => Err(RawFailure::transport(503, "unavailable")),
            _ => Ok("done"),
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*retries.lock().unwrap(), vec![2, 3]);
    assert_eq!(start.elapsed(), Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_on_permanent_failure() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result: Result<(), _> = with_retry(&RetryOptions::default(), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(RawFailure::transport(401, "expired"))
    })
    .await;

    assert_eq!(result.unwrap_err(), RawFailure::transport(401, "expired"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_last_error_after_exhaustion() {
    let calls = AtomicU32::new(0);
    let options = RetryOptions::new().with_max_attempts(4).with_jitter(false);

    let result: Result<(), _> = with_retry(&options, || async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Err(RawFailure::transport(500, format!("failure {}", n + 1)))
    })
    .await;

    assert_eq!(result.unwrap_err().message(), "failure 4");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured_for_rate_limits() {
    let calls = AtomicU32::new(0);
    let options = RetryOptions::new()
        .with_jitter(false)
        .with_honor_retry_after(true);

    let start = Instant::now();
    let result = with_retry(&options, || async {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(RawFailure::Transport(
                TransportFailure::new(Some(429), "slow down")
                    .with_retry_after(Duration::from_millis(2500)),
            ))
        } else {
            Ok(())
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(start.elapsed(), Duration::from_millis(2500));
}

// ============================================================================
// Hub → notifications
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reported_error_lifecycle() {
    let resilience = Resilience::new(ResilienceConfig::default(), Arc::new(NoProbe));
    let notifications = resilience.notifications().clone();

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    notifications.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    resilience.report(&RawFailure::transport(502, "bad gateway"), quiet());
    let item = notifications.items().remove(0);
    assert_eq!(item.state, NotificationState::Visible);
    assert_eq!(item.expires_after, Some(Duration::from_secs(8)));

    tokio::time::sleep(Duration::from_millis(8000 + 300 + 1)).await;
    assert!(notifications.is_empty());
    // Shown, dismissing, removed.
    assert_eq!(changes.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_critical_report_stays_until_dismissed() {
    let resilience = Resilience::new(ResilienceConfig::default(), Arc::new(NoProbe));
    let details = resilience.report(
        &RawFailure::transport(500, "ledger mismatch"),
        quiet().with_severity(Severity::Critical),
    );
    assert_eq!(details.severity, Severity::Critical);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let notifications = resilience.notifications();
    let id = notifications.items()[0].id.clone();
    assert!(notifications.get(&id).unwrap().visible);

    assert!(notifications.trigger_action(&id, 0));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(notifications.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_validation_errors_stay_inline_by_default() {
    let resilience = Resilience::new(ResilienceConfig::default(), Arc::new(NoProbe));
    let details = resilience.report(&RawFailure::transport(422, "Invalid email"), quiet());

    assert_eq!(details.kind, ErrorKind::Validation);
    assert!(resilience.notifications().is_empty());

    let config =
        ResilienceConfig::from_toml_str("[notification]\nnotify_validation = true\n").unwrap();
    let resilience = Resilience::new(config, Arc::new(NoProbe));
    resilience.report(&RawFailure::transport(422, "Invalid email"), quiet());
    assert_eq!(resilience.notifications().len(), 1);
}

// ============================================================================
// Network monitor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_outage_collapses_notifications_and_probe_recovers() {
    let probe = Arc::new(SwitchProbe(AtomicBool::new(false)));
    let config = ResilienceConfig::default();
    let resilience = Resilience::new(config, probe.clone());
    let monitor = resilience.monitor().clone();

    monitor.handle_platform_event(PlatformSignal::Offline);
    assert!(!monitor.is_online());

    for _ in 0..5 {
        let details = resilience.report(&RawFailure::unreachable("fetch failed"), quiet());
        assert!(details.was_offline());
    }
    let items = resilience.notifications().items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, OFFLINE_NOTIFICATION_ID);

    // The probe keeps failing while the backend is unreachable.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(!monitor.is_online());

    probe.0.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let state = monitor.state();
    assert!(state.is_online);
    assert!(!state.platform_online);
    assert!(state.cumulative_downtime >= Duration::from_secs(30));
    assert!(!monitor.is_probing());
    // The collapsed outage notification leaves with the outage.
    assert!(resilience.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_transitions_are_edge_triggered() {
    let monitor = NetworkMonitor::new(ProbeConfig::default(), Arc::new(NoProbe));
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    monitor.subscribe(move |t| sink.lock().unwrap().push(t.is_online));

    monitor.handle_platform_event(PlatformSignal::Online);
    monitor.handle_platform_event(PlatformSignal::Offline);
    monitor.handle_platform_event(PlatformSignal::Offline);
    tokio::time::sleep(Duration::from_secs(4)).await;
    monitor.handle_platform_event(PlatformSignal::Online);
    monitor.handle_platform_event(PlatformSignal::Online);

    assert_eq!(*transitions.lock().unwrap(), vec![false, true]);
    assert_eq!(monitor.state().cumulative_downtime, Duration::from_secs(4));
}
