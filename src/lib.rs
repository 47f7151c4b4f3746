//! Resilix - client-side resilience layer
//!
//! Classifies failures into a closed taxonomy, retries transient ones with
//! exponential backoff, tracks network reachability, fans classified errors
//! out to subscribers and queues user-facing notifications.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod network;
pub mod notification;
pub mod retry;
pub mod subscription;

pub use config::ResilienceConfig;
pub use context::Resilience;
pub use dispatch::{ErrorHub, ErrorListener, ReportOptions};
pub use error::{classify, ErrorClassifier, ErrorDetails, ErrorKind, RawFailure, Severity};
pub use network::NetworkMonitor;
pub use notification::{Notification, NotificationManager};
pub use retry::{with_retry, RetryOptions};
