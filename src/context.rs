//! Composition root.
//!
//! Builds and wires the hub, notification manager and network monitor from
//! one configuration so applications hold a single handle. While the monitor
//! reports offline, connectivity errors collapse into one notification that
//! is dismissed again when connectivity returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::ResilienceConfig;
use crate::dispatch::{ErrorHub, ReportOptions};
use crate::error::{AsRawFailure, ErrorClassifier, ErrorDetails, RawFailure};
use crate::network::{HttpProbe, NetworkMonitor, ProbeError, ReachabilityProbe};
use crate::notification::{NotificationBridge, NotificationManager, OFFLINE_NOTIFICATION_ID};
use crate::retry::{with_retry_using, RetryOptions};
use crate::subscription::SubscriptionId;

/// Probe used when no health endpoint is configured. Always fails, so the
/// monitor only leaves the offline state on a platform event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl ReachabilityProbe for NoProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        Err(ProbeError::Other("no probe endpoint configured".to_string()))
    }
}

/// Owns the resilience components for one application.
pub struct Resilience {
    config: ResilienceConfig,
    retry: RetryOptions,
    classifier: ErrorClassifier,
    hub: Arc<ErrorHub>,
    notifications: NotificationManager,
    monitor: NetworkMonitor,
    bridge: Option<SubscriptionId>,
    reconnect: Option<SubscriptionId>,
}

impl Resilience {
    /// Wires the components together around `probe`.
    pub fn new(config: ResilienceConfig, probe: Arc<dyn ReachabilityProbe>) -> Self {
        let monitor = NetworkMonitor::new(config.probe_config(), probe);
        let connectivity = Arc::new(monitor.clone());
        let classifier = ErrorClassifier::new().with_connectivity(connectivity.clone());
        let hub = Arc::new(ErrorHub::new(classifier.clone()));
        let notifications = NotificationManager::new(config.notification_config());

        let mut bridge =
            NotificationBridge::new(notifications.clone()).with_connectivity(connectivity);
        if config.notification.notify_validation {
            bridge = bridge.with_validation();
        }
        let bridge = hub.subscribe(Arc::new(bridge));

        let reconnect = monitor.subscribe({
            let notifications = notifications.clone();
            move |transition| {
                if transition.is_online {
                    notifications.dismiss(OFFLINE_NOTIFICATION_ID);
                }
            }
        });

        Self {
            retry: config.retry_options(),
            config,
            classifier,
            hub,
            notifications,
            monitor,
            bridge: Some(bridge),
            reconnect: Some(reconnect),
        }
    }

    /// Like [`Resilience::new`], probing the configured endpoint over HTTP.
    pub fn from_config(config: ResilienceConfig) -> Result<Self, ProbeError> {
        let probe: Arc<dyn ReachabilityProbe> = match &config.probe.endpoint {
            Some(endpoint) => Arc::new(HttpProbe::new(
                endpoint.clone(),
                Duration::from_millis(config.probe.timeout_ms),
            )?),
            None => Arc::new(NoProbe),
        };
        info!(endpoint = ?config.probe.endpoint, "Resilience layer initialized");
        Ok(Self::new(config, probe))
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn hub(&self) -> &Arc<ErrorHub> {
        &self.hub
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Reports a failure through the hub.
    pub fn report(&self, raw: &RawFailure, options: ReportOptions) -> ErrorDetails {
        self.hub.report(raw, options)
    }

    pub fn report_error<E: AsRawFailure>(&self, error: &E, options: ReportOptions) -> ErrorDetails {
        self.hub.report_error(error, options)
    }

    /// Runs `operation` with the configured retry policy.
    pub async fn retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: AsRawFailure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry_using(&self.classifier, &self.retry, operation).await
    }

    /// Runs `operation` with `options` instead of the configured policy.
    pub async fn retry_with<T, E, F, Fut>(&self, options: &RetryOptions, operation: F) -> Result<T, E>
    where
        E: AsRawFailure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry_using(&self.classifier, options, operation).await
    }

    /// Stops the background probe and detaches notifications from the hub
    /// and the monitor. Idempotent.
    pub fn shutdown(&mut self) {
        self.monitor.shutdown();
        if let Some(reconnect) = self.reconnect.take() {
            self.monitor.unsubscribe(reconnect);
        }
        if let Some(bridge) = self.bridge.take() {
            self.hub.unsubscribe(bridge);
            info!("Resilience layer shut down");
        }
    }
}

impl Drop for Resilience {
    fn drop(&mut self) {
        self.shutdown();
    }
}
