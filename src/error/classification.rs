//! Error taxonomy types for the resilience layer
//!
//! Failures are described by a closed [`ErrorKind`], an ordered [`Severity`],
//! and a set of [`RecoveryAction`]s the user can take. [`ErrorDetails`] bundles
//! these with the user-facing message and diagnostic context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key set when an error was classified while the client was offline.
pub const CONTEXT_WAS_OFFLINE: &str = "wasOffline";

/// Context key holding the original value of an opaque failure.
pub const CONTEXT_ORIGINAL_ERROR: &str = "originalError";

/// The closed set of failure kinds.
///
/// Every failure resolves to exactly one kind; anything that cannot be mapped
/// becomes [`ErrorKind::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The client could not reach the server at all.
    Network,
    /// Credentials are missing or expired (HTTP 401).
    Authentication,
    /// Credentials are valid but lack permission (HTTP 403).
    Authorization,
    /// The request payload was rejected (HTTP 422).
    Validation,
    /// Too many requests (HTTP 429).
    RateLimit,
    /// Server-side failure (HTTP 5xx).
    Server,
    /// The operation timed out or was aborted.
    Timeout,
    /// The account has used up its quota.
    QuotaExceeded,
    /// The uploaded payload exceeds a size limit.
    PayloadTooLarge,
    /// The payload format is not supported.
    UnsupportedFormat,
    /// A domain operation (generation, creation) failed.
    OperationFailed,
    /// Anything that could not be mapped.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::Authorization,
        ErrorKind::Validation,
        ErrorKind::RateLimit,
        ErrorKind::Server,
        ErrorKind::Timeout,
        ErrorKind::QuotaExceeded,
        ErrorKind::PayloadTooLarge,
        ErrorKind::UnsupportedFormat,
        ErrorKind::OperationFailed,
        ErrorKind::Unknown,
    ];

    /// Returns true for kinds that are worth retrying automatically.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }

    /// The default message shown to users for this kind.
    pub fn default_user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "Unable to connect to the server. Please check your internet connection."
            }
            ErrorKind::Authentication => "Your session has expired. Please sign in again.",
            ErrorKind::Authorization => "You don't have permission to perform this action.",
            ErrorKind::Validation => "Please check your input and try again.",
            ErrorKind::RateLimit => "Too many requests. Please wait a moment and try again.",
            ErrorKind::Server => "Something went wrong on our end. Please try again later.",
            ErrorKind::Timeout => "The request took too long to complete. Please try again.",
            ErrorKind::QuotaExceeded => {
                "You have reached your usage limit. Upgrade your plan or contact support."
            }
            ErrorKind::PayloadTooLarge => "The file is too large. Please choose a smaller file.",
            ErrorKind::UnsupportedFormat => "This file format is not supported.",
            ErrorKind::OperationFailed => {
                "The operation could not be completed. Please try again."
            }
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Timeout => "timeout",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::OperationFailed => "operation_failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How serious a failure is. Ordered `Low < Medium < High < Critical`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Critical failures must stay on screen until the user dismisses them.
    pub fn requires_acknowledgement(self) -> bool {
        self >= Severity::Critical
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// The kind of step a [`RecoveryAction`] suggests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    Retry,
    Reload,
    ReAuthenticate,
    ContactSupport,
    Custom,
}

/// Callback invoked when the user picks an action.
pub type ActionHandler = Arc<dyn Fn() + Send + Sync>;

/// A suggested next step attached to a classified error.
///
/// Handlers are optional: the classifier only attaches labels and kinds, and
/// the presentation layer binds handlers it knows how to run.
#[derive(Clone, Serialize)]
pub struct RecoveryAction {
    pub label: String,
    pub kind: RecoveryActionKind,
    #[serde(skip)]
    pub handler: Option<ActionHandler>,
}

impl RecoveryAction {
    pub fn new(label: impl Into<String>, kind: RecoveryActionKind) -> Self {
        Self {
            label: label.into(),
            kind,
            handler: None,
        }
    }

    /// Attaches a handler to the action.
    pub fn with_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Runs the handler if one is attached. Returns whether anything ran.
    pub fn invoke(&self) -> bool {
        match &self.handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// Handlers are compared by presence only; closures have no useful identity.
impl PartialEq for RecoveryAction {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.kind == other.kind
            && self.handler.is_some() == other.handler.is_some()
    }
}

/// A field-level validation entry reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path to the offending field, e.g. `["body", "title"]`.
    #[serde(default)]
    pub location: Vec<String>,
    pub message: String,
    /// Machine-readable validation type, e.g. `value_error.missing`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl FieldError {
    pub fn new(location: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
            kind: None,
        }
    }

    /// The field name (last path segment), if any.
    pub fn field(&self) -> Option<&str> {
        self.location.last().map(String::as_str)
    }
}

/// A classified failure, ready to show to a user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Diagnostic message; never shown to end users.
    pub raw_message: String,
    /// Message safe to render. Never empty.
    pub user_message: String,
    pub code: Option<String>,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub context: HashMap<String, Value>,
    pub recovery_actions: Vec<RecoveryAction>,
    pub field_errors: Vec<FieldError>,
}

impl ErrorDetails {
    /// Creates details for `kind` with the kind's default user message and no
    /// recovery actions.
    pub fn new(kind: ErrorKind, severity: Severity, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            raw_message: raw_message.into(),
            user_message: kind.default_user_message().to_string(),
            code: None,
            correlation_id: None,
            occurred_at: Utc::now(),
            context: HashMap::new(),
            recovery_actions: Vec::new(),
            field_errors: Vec::new(),
        }
    }

    /// Replaces the user message. Blank messages are ignored so the
    /// non-empty invariant holds.
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.trim().is_empty() {
            self.user_message = message;
        }
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_actions(mut self, actions: Vec<RecoveryAction>) -> Self {
        self.recovery_actions = actions;
        self
    }

    pub fn with_field_errors(mut self, field_errors: Vec<FieldError>) -> Self {
        self.field_errors = field_errors;
        self
    }

    /// Adds a context entry. Later writes to the same key win.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Merges `context` into the details; the incoming keys win on conflict.
    pub fn merge_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    /// The primary (first) recovery action, if any.
    pub fn primary_action(&self) -> Option<&RecoveryAction> {
        self.recovery_actions.first()
    }

    /// Returns true if the error was classified while the client was offline.
    pub fn was_offline(&self) -> bool {
        matches!(self.context.get(CONTEXT_WAS_OFFLINE), Some(Value::Bool(true)))
    }

    /// The message to render.
    ///
    /// Unknown failures that happened while offline are almost always
    /// connectivity problems, so they get the network message instead.
    pub fn display_message(&self) -> &str {
        if self.kind == ErrorKind::Unknown && self.was_offline() {
            ErrorKind::Network.default_user_message()
        } else {
            &self.user_message
        }
    }

    /// The user message followed by the correlation id, for support requests.
    pub fn support_message(&self) -> String {
        match &self.correlation_id {
            Some(id) => format!("{} (Reference: {})", self.display_message(), id),
            None => self.display_message().to_string(),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ErrorDetails {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Critical.requires_acknowledgement());
        assert!(!Severity::High.requires_acknowledgement());
    }

    #[test]
    fn test_every_kind_has_a_user_message() {
        for kind in ErrorKind::ALL {
            assert!(
                !kind.default_user_message().is_empty(),
                "{kind} has no message"
            );
        }
    }

    #[test]
    fn test_transient_kinds() {
        let transient: Vec<_> = ErrorKind::ALL
            .into_iter()
            .filter(|k| k.is_transient())
            .collect();
        assert_eq!(
            transient,
            vec![
                ErrorKind::Network,
                ErrorKind::RateLimit,
                ErrorKind::Server,
                ErrorKind::Timeout
            ]
        );
    }

    #[test]
    fn test_blank_user_message_is_ignored() {
        let details = ErrorDetails::new(ErrorKind::Server, Severity::High, "boom")
            .with_user_message("   ");
        assert_eq!(
            details.user_message,
            ErrorKind::Server.default_user_message()
        );
    }

    #[test]
    fn test_context_last_write_wins() {
        let details = ErrorDetails::new(ErrorKind::Unknown, Severity::Medium, "x")
            .add_context("a", 1)
            .add_context("a", 2);
        assert_eq!(details.context.get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_merge_context_incoming_wins() {
        let mut incoming = HashMap::new();
        incoming.insert("source".to_string(), json!("caller"));
        incoming.insert("extra".to_string(), json!(true));

        let details = ErrorDetails::new(ErrorKind::Unknown, Severity::Medium, "x")
            .add_context("source", "classifier")
            .merge_context(incoming);

        assert_eq!(details.context.get("source"), Some(&json!("caller")));
        assert_eq!(details.context.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn test_display_message_prefers_network_when_offline() {
        let details = ErrorDetails::new(ErrorKind::Unknown, Severity::Medium, "fetch failed")
            .add_context(CONTEXT_WAS_OFFLINE, true);
        assert!(details.was_offline());
        assert_eq!(
            details.display_message(),
            ErrorKind::Network.default_user_message()
        );

        let server = ErrorDetails::new(ErrorKind::Server, Severity::High, "500")
            .add_context(CONTEXT_WAS_OFFLINE, true);
        assert_eq!(server.display_message(), server.user_message);
    }

    #[test]
    fn test_support_message_includes_correlation_id() {
        let details = ErrorDetails::new(ErrorKind::Server, Severity::High, "500")
            .with_correlation_id(Some("req-42".to_string()));
        assert!(details.support_message().ends_with("(Reference: req-42)"));
    }

    #[test]
    fn test_recovery_action_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let action = RecoveryAction::new("Retry", RecoveryActionKind::Retry)
            .with_handler(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert!(action.invoke());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!RecoveryAction::new("Reload", RecoveryActionKind::Reload).invoke());
    }

    #[test]
    fn test_details_serialize_skips_handlers() {
        let details = ErrorDetails::new(ErrorKind::Network, Severity::High, "offline")
            .with_actions(vec![
                RecoveryAction::new("Retry", RecoveryActionKind::Retry).with_handler(|| {})
            ]);
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["kind"], json!("network"));
        assert_eq!(value["severity"], json!("high"));
        assert_eq!(
            value["recovery_actions"][0],
            json!({"label": "Retry", "kind": "retry"})
        );
    }

    #[test]
    fn test_field_error_field_name() {
        let error = FieldError::new(vec!["body".into(), "title".into()], "Field required");
        assert_eq!(error.field(), Some("title"));
        assert_eq!(FieldError::new(vec![], "x").field(), None);
    }
}
