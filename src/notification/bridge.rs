//! Hub listener that turns reported errors into notifications.
//!
//! While a connectivity source reports offline, network errors share the
//! [`OFFLINE_NOTIFICATION_ID`] slot and replace each other in place.

use std::sync::Arc;

use tracing::debug;

use super::{Notification, NotificationManager};
use crate::dispatch::{ErrorListener, ListenerError};
use crate::error::{Connectivity, ErrorDetails, ErrorKind};

/// Id shared by every connectivity error raised while offline, so an outage
/// shows one notification instead of one per failed request.
pub const OFFLINE_NOTIFICATION_ID: &str = "network-offline";

/// Subscribes a [`NotificationManager`] to an error hub.
///
/// Validation errors are skipped by default; forms show those inline.
pub struct NotificationBridge {
    manager: NotificationManager,
    skip_validation: bool,
    connectivity: Option<Arc<dyn Connectivity>>,
}

impl NotificationBridge {
    pub fn new(manager: NotificationManager) -> Self {
        Self {
            manager,
            skip_validation: true,
            connectivity: None,
        }
    }

    /// Also notify validation errors.
    pub fn with_validation(mut self) -> Self {
        self.skip_validation = false;
        self
    }

    /// Collapses connectivity errors into a single notification while
    /// `source` reports offline.
    pub fn with_connectivity(mut self, source: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(source);
        self
    }

    pub fn manager(&self) -> &NotificationManager {
        &self.manager
    }

    fn is_offline_noise(&self, details: &ErrorDetails) -> bool {
        let offline = self
            .connectivity
            .as_ref()
            .is_some_and(|source| source.is_offline());
        offline && matches!(details.kind, ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl ErrorListener for NotificationBridge {
    fn on_error(&self, details: &ErrorDetails) -> Result<(), ListenerError> {
        if self.skip_validation && details.kind == ErrorKind::Validation {
            debug!(code = ?details.code, "Validation error left to inline display");
            return Ok(());
        }

        let notification = Notification::from_error(details);
        let notification = if self.is_offline_noise(details) {
            notification.with_id(OFFLINE_NOTIFICATION_ID).persistent()
        } else {
            notification
        };
        self.manager.enqueue(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ErrorHub, ReportOptions};
    use crate::error::RawFailure;
    use crate::notification::NotificationKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(AtomicBool);

    impl Connectivity for Flag {
        fn is_offline(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn wired(bridge: NotificationBridge) -> (ErrorHub, NotificationManager) {
        let manager = bridge.manager().clone();
        let hub = ErrorHub::default();
        hub.subscribe(Arc::new(bridge));
        (hub, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_errors_become_notifications() {
        let (hub, manager) = wired(NotificationBridge::new(NotificationManager::default()));
        hub.report(&RawFailure::transport(503, "down"), ReportOptions::new().suppress_log());

        let items = manager.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::Error);
        assert_eq!(items[0].actions[0].label, "Retry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_skipped_unless_enabled() {
        let (hub, manager) = wired(NotificationBridge::new(NotificationManager::default()));
        hub.report(&RawFailure::transport(422, "bad"), ReportOptions::new().suppress_log());
        assert!(manager.is_empty());

        let (hub, manager) = wired(
            NotificationBridge::new(NotificationManager::default()).with_validation(),
        );
        hub.report(&RawFailure::transport(422, "bad"), ReportOptions::new().suppress_log());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.items()[0].kind, NotificationKind::Info);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_errors_collapse_into_one() {
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        let (hub, manager) = wired(
            NotificationBridge::new(NotificationManager::default())
                .with_connectivity(flag.clone()),
        );

        for _ in 0..3 {
            hub.report(&RawFailure::unreachable("fetch failed"), ReportOptions::new().suppress_log());
        }
        let items = manager.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, OFFLINE_NOTIFICATION_ID);
        assert!(items[0].persistent);

        flag.0.store(false, Ordering::SeqCst);
        hub.report(&RawFailure::unreachable("fetch failed"), ReportOptions::new().suppress_log());
        assert_eq!(manager.len(), 2);
    }
}
