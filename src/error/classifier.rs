//! Failure classifier
//!
//! Maps a [`RawFailure`] to [`ErrorDetails`]. Transport failures are mapped by
//! status code; generic failures are matched against keyword rules in priority
//! order. Classification never fails: anything unrecognised becomes
//! [`ErrorKind::Unknown`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::humanize::{humanize, summarize_field_errors};
use super::{
    ErrorDetails, ErrorKind, GenericFailure, RawFailure, RecoveryAction, RecoveryActionKind,
    Severity, TransportFailure, CONTEXT_ORIGINAL_ERROR, CONTEXT_WAS_OFFLINE,
};

/// Application codes that mark a transport failure as a validation error.
const VALIDATION_CODES: [&str; 2] = ["validation_error", "validation"];

/// Application code for an exhausted account quota.
const QUOTA_CODE: &str = "quota_exceeded";

/// Reports whether the client currently believes it is offline.
///
/// Implemented by the network monitor so errors can be tagged with the
/// connectivity state at the time they happened.
pub trait Connectivity: Send + Sync {
    fn is_offline(&self) -> bool;
}

/// A keyword rule for generic failure messages.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    regex: Regex,
    kind: ErrorKind,
    severity: Severity,
    description: String,
}

impl KeywordRule {
    /// Creates a new rule.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid.
    pub fn new(
        pattern: &str,
        kind: ErrorKind,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            kind,
            severity,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

fn default_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new(
            r"(?i)time[\s\-]?out|timed\s+out|abort",
            ErrorKind::Timeout,
            Severity::Medium,
            "Timed out or aborted",
        ),
        KeywordRule::new(
            r"(?i)too\s+large|size\s+limit",
            ErrorKind::PayloadTooLarge,
            Severity::Low,
            "Payload exceeds size limit",
        ),
        KeywordRule::new(
            r"(?i)unsupported|invalid\s+format",
            ErrorKind::UnsupportedFormat,
            Severity::Low,
            "Unsupported format",
        ),
        KeywordRule::new(
            r"(?i)generation|creation",
            ErrorKind::OperationFailed,
            Severity::Medium,
            "Domain operation failed",
        ),
    ]
}

/// The default classifier, built once per process.
pub(crate) fn shared_classifier() -> &'static ErrorClassifier {
    static CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();
    CLASSIFIER.get_or_init(ErrorClassifier::new)
}

/// Classifies a failure with the default rules and no connectivity context.
pub fn classify(raw: &RawFailure) -> ErrorDetails {
    shared_classifier().classify(raw)
}

/// Returns true if an operation that failed with `raw` is worth retrying.
///
/// Retryable when the kind is transient, or when a transport failure got no
/// response or a 408, 429 or 5xx status.
pub fn is_retryable(raw: &RawFailure, details: &ErrorDetails) -> bool {
    if details.kind.is_transient() {
        return true;
    }
    match raw {
        RawFailure::Transport(t) => match t.effective_status() {
            None => true,
            Some(status) => status == 408 || status == 429 || status >= 500,
        },
        _ => false,
    }
}

/// The fixed, ordered recovery actions for a kind. The first is the primary.
pub fn recovery_actions_for(kind: ErrorKind) -> Vec<RecoveryAction> {
    use RecoveryActionKind::*;

    let actions: &[(&str, RecoveryActionKind)] = match kind {
        ErrorKind::Network => &[("Retry", Retry), ("Reload page", Reload)],
        ErrorKind::Authentication => &[("Sign in again", ReAuthenticate)],
        ErrorKind::Authorization => &[("Contact support", ContactSupport)],
        ErrorKind::Validation => &[],
        ErrorKind::RateLimit => &[("Retry later", Retry)],
        ErrorKind::Server => &[("Retry", Retry), ("Contact support", ContactSupport)],
        ErrorKind::Timeout => &[("Retry", Retry)],
        ErrorKind::QuotaExceeded => &[("Contact support", ContactSupport)],
        ErrorKind::PayloadTooLarge | ErrorKind::UnsupportedFormat => &[],
        ErrorKind::OperationFailed => &[("Retry", Retry), ("Contact support", ContactSupport)],
        ErrorKind::Unknown => &[("Retry", Retry), ("Reload page", Reload)],
    };

    actions
        .iter()
        .map(|(label, kind)| RecoveryAction::new(*label, *kind))
        .collect()
}

/// Classifier with configurable keyword rules and optional connectivity
/// enrichment.
#[derive(Clone)]
pub struct ErrorClassifier {
    rules: Vec<KeywordRule>,
    connectivity: Option<Arc<dyn Connectivity>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("rules", &self.rules.len())
            .field("connectivity", &self.connectivity.is_some())
            .finish()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            connectivity: None,
        }
    }

    /// Creates a classifier with custom keyword rules, in priority order.
    pub fn with_rules(rules: Vec<KeywordRule>) -> Self {
        Self {
            rules,
            connectivity: None,
        }
    }

    /// Tags every classified error with the connectivity state of `source`.
    pub fn with_connectivity(mut self, source: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(source);
        self
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Classifies a failure. Never fails.
    pub fn classify(&self, raw: &RawFailure) -> ErrorDetails {
        let details = match raw {
            RawFailure::Transport(t) => classify_transport(t),
            RawFailure::Generic(g) => self.classify_generic(g),
            RawFailure::Text(text) => {
                ErrorDetails::new(ErrorKind::Unknown, Severity::Low, text.clone())
                    .with_user_message(text.clone())
                    .with_actions(recovery_actions_for(ErrorKind::Unknown))
            }
            RawFailure::Opaque(value) => {
                ErrorDetails::new(ErrorKind::Unknown, Severity::Medium, value.to_string())
                    .add_context(CONTEXT_ORIGINAL_ERROR, value.clone())
                    .with_actions(recovery_actions_for(ErrorKind::Unknown))
            }
        };

        match &self.connectivity {
            Some(source) if source.is_offline() => details.add_context(CONTEXT_WAS_OFFLINE, true),
            _ => details,
        }
    }

    /// Classifies `raw` and applies [`is_retryable`].
    pub fn is_retryable(&self, raw: &RawFailure) -> bool {
        is_retryable(raw, &self.classify(raw))
    }

    fn classify_generic(&self, failure: &GenericFailure) -> ErrorDetails {
        let haystack = match &failure.name {
            Some(name) => format!("{}: {}", name, failure.message),
            None => failure.message.clone(),
        };

        let (kind, severity) = self
            .rules
            .iter()
            .find(|rule| rule.matches(&haystack))
            .map(|rule| (rule.kind, rule.severity))
            .unwrap_or((ErrorKind::Unknown, Severity::Medium));

        let details = ErrorDetails::new(kind, severity, failure.message.clone())
            .with_actions(recovery_actions_for(kind));
        match &failure.name {
            Some(name) => details.add_context("errorName", name.clone()),
            None => details,
        }
    }
}

fn classify_transport(failure: &TransportFailure) -> ErrorDetails {
    let code = failure.code.as_deref();
    let validation_code = code.is_some_and(|c| VALIDATION_CODES.contains(&c));
    let status = failure.effective_status();

    let (mut kind, mut severity) = match status {
        None => (ErrorKind::Network, Severity::High),
        Some(401) => (ErrorKind::Authentication, Severity::High),
        Some(403) => (ErrorKind::Authorization, Severity::Medium),
        Some(422) => (ErrorKind::Validation, Severity::Low),
        Some(_) if validation_code => (ErrorKind::Validation, Severity::Low),
        Some(429) => (ErrorKind::RateLimit, Severity::Medium),
        Some(s) if s >= 500 => (ErrorKind::Server, Severity::High),
        Some(_) => (ErrorKind::Unknown, Severity::Medium),
    };

    if code == Some(QUOTA_CODE) && matches!(kind, ErrorKind::Unknown | ErrorKind::Authorization) {
        kind = ErrorKind::QuotaExceeded;
        severity = Severity::Medium;
    }

    let raw_message = match (failure.message.trim(), status) {
        ("", Some(status)) => format!("HTTP {}", status),
        ("", None) => "Network request failed".to_string(),
        (message, _) => message.to_string(),
    };

    let mut details = ErrorDetails::new(kind, severity, raw_message)
        .with_correlation_id(failure.trace_id.clone())
        .with_actions(recovery_actions_for(kind));

    if let Some(code) = code.map(str::to_string).or(status.map(|s| s.to_string())) {
        details = details.with_code(code);
    }
    if let Some(status) = status {
        details = details.add_context("status", status);
    }

    match kind {
        ErrorKind::Validation => {
            let field_errors: Vec<_> = failure
                .details
                .iter()
                .map(|entry| super::FieldError {
                    message: humanize(&entry.message),
                    ..entry.clone()
                })
                .collect();
            let message = summarize_field_errors(&failure.details)
                .unwrap_or_else(|| humanize(&failure.message));
            details.with_user_message(message).with_field_errors(field_errors)
        }
        ErrorKind::RateLimit => match failure.retry_after() {
            Some(wait) if wait.as_secs() > 0 => details.with_user_message(format!(
                "Too many requests. Please wait {} seconds and try again.",
                wait.as_secs()
            )),
            _ => details,
        },
        _ => details,
    }
}
