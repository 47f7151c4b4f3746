//! User-facing notifications.
//!
//! A [`Notification`] is a request to show an ephemeral message; the
//! [`NotificationManager`] owns the live queue and drives each item through
//! `Created → Visible → Dismissing → Removed`. Consumers render
//! [`NotificationItem`] snapshots.

mod bridge;
mod manager;

pub use bridge::{NotificationBridge, OFFLINE_NOTIFICATION_ID};
pub use manager::{ChangeCallback, NotificationManager};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ActionHandler, ErrorDetails, ErrorKind, Severity};

/// Visual category of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// Lifecycle of a queued notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    /// Accepted by the manager but not yet shown. Items leave this state
    /// before `enqueue` returns, so snapshots never carry it.
    Created,
    Visible,
    /// Exit animation running; still in the queue but not visible.
    Dismissing,
    Removed,
}

/// Where the presentation layer should stack notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationPosition {
    TopLeft,
    TopCenter,
    #[default]
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// Configuration for the notification manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// How many of the most recent items consumers should render.
    /// Default: 5
    pub max_visible: usize,
    pub position: NotificationPosition,
    /// Lifetime of non-error notifications.
    /// Default: 5 seconds
    pub default_duration: Duration,
    /// Lifetime of error notifications.
    /// Default: 8 seconds
    pub error_duration: Duration,
    /// Time an item stays queued but invisible before removal.
    /// Default: 300 milliseconds
    pub exit_delay: Duration,
    /// Queue capacity; the oldest item is evicted beyond this.
    /// Default: 50
    pub max_queued: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_visible: 5,
            position: NotificationPosition::TopRight,
            default_duration: Duration::from_millis(5000),
            error_duration: Duration::from_millis(8000),
            exit_delay: Duration::from_millis(300),
            max_queued: 50,
        }
    }
}

impl NotificationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recent items returned by `visible_items`.
    pub fn with_max_visible(mut self, max_visible: usize) -> Self {
        self.max_visible = max_visible;
        self
    }

    /// Stacking position hint for the presentation layer.
    pub fn with_position(mut self, position: NotificationPosition) -> Self {
        self.position = position;
        self
    }

    /// Lifetime of non-error notifications.
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    /// Lifetime of error notifications.
    pub fn with_error_duration(mut self, duration: Duration) -> Self {
        self.error_duration = duration;
        self
    }

    /// Time a dismissed item lingers before removal.
    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    /// Queue capacity before the oldest item is evicted.
    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        self
    }

    /// Lifetime for a non-persistent notification of `kind`.
    pub fn duration_for(&self, kind: NotificationKind) -> Duration {
        match kind {
            NotificationKind::Error => self.error_duration,
            _ => self.default_duration,
        }
    }
}

/// A button on a notification.
#[derive(Clone, Serialize)]
pub struct NotificationAction {
    pub label: String,
    /// Rendered as the default button.
    pub primary: bool,
    #[serde(skip)]
    pub handler: Option<ActionHandler>,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            primary: false,
            handler: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAction")
            .field("label", &self.label)
            .field("primary", &self.primary)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for NotificationAction {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.primary == other.primary
            && self.handler.is_some() == other.handler.is_some()
    }
}

/// Called with the item id once the item has been removed.
pub type CloseHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A request to show a notification.
#[derive(Clone)]
pub struct Notification {
    /// Reusing the id of a live item replaces it in place.
    pub id: Option<String>,
    pub kind: NotificationKind,
    pub title: Option<String>,
    pub message: String,
    pub actions: Vec<NotificationAction>,
    /// Overrides the configured lifetime.
    pub duration: Option<Duration>,
    pub persistent: bool,
    pub dismissible: bool,
    /// Severity of the error this notification reports, if any. Critical
    /// forces `persistent`.
    pub severity: Option<Severity>,
    pub on_close: Option<CloseHandler>,
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("message", &self.message)
            .field("actions", &self.actions)
            .field("duration", &self.duration)
            .field("persistent", &self.persistent)
            .field("dismissible", &self.dismissible)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            title: None,
            message: message.into(),
            actions: Vec::new(),
            duration: None,
            persistent: false,
            dismissible: true,
            severity: None,
            on_close: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, message)
    }

    /// Builds a notification for a classified error.
    ///
    /// Recovery actions become buttons, the first one primary. Critical
    /// errors are persistent.
    pub fn from_error(details: &ErrorDetails) -> Self {
        let kind = match details.severity {
            Severity::Low => NotificationKind::Info,
            Severity::Medium => NotificationKind::Warning,
            Severity::High | Severity::Critical => NotificationKind::Error,
        };

        let actions = details
            .recovery_actions
            .iter()
            .enumerate()
            .map(|(index, action)| NotificationAction {
                label: action.label.clone(),
                primary: index == 0,
                handler: action.handler.clone(),
            })
            .collect();

        Self {
            title: Some(title_for(details.kind).to_string()),
            actions,
            severity: Some(details.severity),
            ..Self::new(kind, details.support_message())
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn not_dismissible(mut self) -> Self {
        self.dismissible = false;
        self
    }

    pub fn on_close(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(handler));
        self
    }

    /// Whether the item must stay until dismissed explicitly.
    pub fn is_persistent(&self) -> bool {
        self.persistent || self.severity.is_some_and(Severity::requires_acknowledgement)
    }
}

fn title_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "Connection problem",
        ErrorKind::Authentication => "Signed out",
        ErrorKind::Authorization => "Access denied",
        ErrorKind::Validation => "Invalid input",
        ErrorKind::RateLimit => "Slow down",
        ErrorKind::Server => "Server error",
        ErrorKind::Timeout => "Request timed out",
        ErrorKind::QuotaExceeded => "Usage limit reached",
        ErrorKind::PayloadTooLarge => "File too large",
        ErrorKind::UnsupportedFormat => "Unsupported format",
        ErrorKind::OperationFailed => "Operation failed",
        ErrorKind::Unknown => "Something went wrong",
    }
}

/// Read-only view of a queued notification.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationItem {
    pub id: String,
    pub kind: NotificationKind,
    pub title: Option<String>,
    pub message: String,
    pub actions: Vec<NotificationAction>,
    pub created_at: DateTime<Utc>,
    /// `None` for persistent items.
    pub expires_after: Option<Duration>,
    pub persistent: bool,
    pub dismissible: bool,
    /// False during the exit animation.
    pub visible: bool,
    pub state: NotificationState,
}
