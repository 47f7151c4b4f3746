//! Error dispatch hub.
//!
//! [`ErrorHub::report`] classifies a failure, logs it at a level derived from
//! its severity and fans it out to every subscriber in subscription order. A
//! subscriber that fails or panics is logged and skipped; it never affects the
//! other subscribers or the caller.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{AsRawFailure, ErrorClassifier, ErrorDetails, RawFailure, Severity};
use crate::subscription::{lock, SubscriptionId, Subscribers};

/// Error type a listener may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every reported error.
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, details: &ErrorDetails) -> Result<(), ListenerError>;
}

/// Adapts a closure into an [`ErrorListener`].
pub struct FnListener<F>(F);

impl<F> ErrorListener for FnListener<F>
where
    F: Fn(&ErrorDetails) + Send + Sync,
{
    fn on_error(&self, details: &ErrorDetails) -> Result<(), ListenerError> {
        (self.0)(details);
        Ok(())
    }
}

/// Options for a single [`ErrorHub::report`] call.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Merged into the classified context; these keys win on conflict.
    pub context: HashMap<String, Value>,
    pub suppress_notify: bool,
    pub suppress_log: bool,
    /// Overrides the classified severity, e.g. to escalate to Critical.
    pub severity: Option<Severity>,
}

impl ReportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn suppress_notify(mut self) -> Self {
        self.suppress_notify = true;
        self
    }

    pub fn suppress_log(mut self) -> Self {
        self.suppress_log = true;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Publish/subscribe registry for classified errors.
///
/// Owned by the application's composition root and shared by `Arc`.
pub struct ErrorHub {
    classifier: ErrorClassifier,
    listeners: Mutex<Subscribers<dyn ErrorListener>>,
}

impl Default for ErrorHub {
    fn default() -> Self {
        Self::new(ErrorClassifier::new())
    }
}

impl fmt::Debug for ErrorHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHub")
            .field("classifier", &self.classifier)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ErrorHub {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            listeners: Mutex::new(Subscribers::new()),
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn subscribe(&self, listener: Arc<dyn ErrorListener>) -> SubscriptionId {
        lock(&self.listeners).insert(listener)
    }

    /// Subscribes a closure.
    pub fn subscribe_fn(
        &self,
        listener: impl Fn(&ErrorDetails) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(Arc::new(FnListener(listener)))
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.listeners).remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Classifies, logs and publishes a failure. Never fails.
    ///
    /// Returns the classified details so the caller can drive local UI state.
    pub fn report(&self, raw: &RawFailure, options: ReportOptions) -> ErrorDetails {
        let ReportOptions {
            context,
            suppress_notify,
            suppress_log,
            severity,
        } = options;

        let mut details = self.classifier.classify(raw).merge_context(context);
        if let Some(severity) = severity {
            details = details.with_severity(severity);
        }

        if !suppress_log {
            log_details(&details);
        }
        if !suppress_notify {
            self.publish(&details);
        }
        details
    }

    /// Reports any error that has a [`RawFailure`] view.
    pub fn report_error<E: AsRawFailure>(&self, error: &E, options: ReportOptions) -> ErrorDetails {
        self.report(&error.as_raw_failure(), options)
    }

    fn publish(&self, details: &ErrorDetails) {
        // Listeners run without the lock so they may (un)subscribe.
        let listeners = lock(&self.listeners).snapshot();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_error(details))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(subscriber = %id, error = %err, "Error subscriber failed");
                }
                Err(payload) => {
                    error!(
                        subscriber = %id,
                        panic = panic_message(payload.as_ref()),
                        "Error subscriber panicked"
                    );
                }
            }
        }
    }
}

fn log_details(details: &ErrorDetails) {
    let code = details.code.as_deref().unwrap_or("-");
    let correlation_id = details.correlation_id.as_deref().unwrap_or("-");
    match details.severity {
        Severity::Low => info!(
            kind = %details.kind,
            severity = %details.severity,
            code,
            correlation_id,
            "{}",
            details.raw_message
        ),
        Severity::Medium => warn!(
            kind = %details.kind,
            severity = %details.severity,
            code,
            correlation_id,
            "{}",
            details.raw_message
        ),
        Severity::High | Severity::Critical => error!(
            kind = %details.kind,
            severity = %details.severity,
            code,
            correlation_id,
            "{}",
            details.raw_message
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_hub() -> (ErrorHub, Arc<Mutex<Vec<ErrorDetails>>>) {
        let hub = ErrorHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe_fn(move |details| sink.lock().unwrap().push(details.clone()));
        (hub, seen)
    }

    struct Failing;

    impl ErrorListener for Failing {
        fn on_error(&self, _details: &ErrorDetails) -> Result<(), ListenerError> {
            Err("toast surface unavailable".into())
        }
    }

    #[test]
    fn test_report_matches_classify_and_merges_context() {
        let hub = ErrorHub::default();
        let raw = RawFailure::transport(503, "unavailable");

        let reported = hub.report(&raw, ReportOptions::new().with_context("a", 1));
        let direct = classify(&raw);

        assert_eq!(reported.context.get("a"), Some(&json!(1)));
        assert_eq!(reported.kind, direct.kind);
        assert_eq!(reported.severity, direct.severity);
        assert_eq!(reported.raw_message, direct.raw_message);
        assert_eq!(reported.user_message, direct.user_message);
        assert_eq!(reported.code, direct.code);
        assert_eq!(reported.correlation_id, direct.correlation_id);
        assert_eq!(reported.recovery_actions, direct.recovery_actions);
        assert_eq!(reported.field_errors, direct.field_errors);
        for (key, value) in &direct.context {
            assert_eq!(reported.context.get(key), Some(value));
        }
    }

    #[test]
    fn test_caller_context_wins() {
        let hub = ErrorHub::default();
        let details = hub.report(
            &RawFailure::transport(500, "boom"),
            ReportOptions::new().with_context("status", "overridden"),
        );
        assert_eq!(details.context.get("status"), Some(&json!("overridden")));
    }

    #[test]
    fn test_subscribers_run_in_order() {
        let hub = ErrorHub::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let sink = Arc::clone(&order);
            hub.subscribe_fn(move |_| sink.lock().unwrap().push(name));
        }

        hub.report(&RawFailure::text("x"), ReportOptions::new());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_and_panicking_subscribers_are_isolated() {
        let hub = ErrorHub::default();
        let calls = Arc::new(AtomicUsize::new(0));

        hub.subscribe(Arc::new(Failing));
        hub.subscribe_fn(|_| panic!("listener exploded"));
        let counter = Arc::clone(&calls);
        hub.subscribe_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let details = hub.report(&RawFailure::transport(500, "boom"), ReportOptions::new());
        assert_eq!(details.kind, ErrorKind::Server);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The hub keeps working afterwards.
        hub.report(&RawFailure::transport(500, "boom"), ReportOptions::new());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_suppress_notify() {
        let (hub, seen) = recording_hub();
        let details = hub.report(
            &RawFailure::transport(401, "expired"),
            ReportOptions::new().suppress_notify().suppress_log(),
        );
        assert_eq!(details.kind, ErrorKind::Authentication);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let (hub, seen) = recording_hub();
        let extra = hub.subscribe_fn(|_| {});
        assert_eq!(hub.subscriber_count(), 2);
        assert!(hub.unsubscribe(extra));
        assert!(!hub.unsubscribe(extra));

        hub.report(&RawFailure::text("x"), ReportOptions::new());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_severity_override() {
        let (hub, seen) = recording_hub();
        let details = hub.report(
            &RawFailure::transport(500, "db corrupted"),
            ReportOptions::new().with_severity(Severity::Critical),
        );
        assert_eq!(details.severity, Severity::Critical);
        assert_eq!(seen.lock().unwrap()[0].severity, Severity::Critical);
    }

    #[test]
    fn test_report_error_uses_raw_view() {
        let hub = ErrorHub::default();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "upload too large");
        let details = hub.report_error(&err, ReportOptions::new().suppress_log());
        assert_eq!(details.kind, ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_during_publish() {
        let hub = Arc::new(ErrorHub::default());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let hub_ref = Arc::downgrade(&hub);
        let slot_ref = Arc::clone(&slot);
        let id = hub.subscribe_fn(move |_| {
            if let (Some(hub), Some(id)) = (hub_ref.upgrade(), *slot_ref.lock().unwrap()) {
                hub.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        hub.report(&RawFailure::text("x"), ReportOptions::new());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
