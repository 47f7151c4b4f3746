//! Raw failures as produced by the transport layer and application code.
//!
//! The classifier never inspects arbitrary values at runtime; everything it
//! sees has been lifted into [`RawFailure`] first.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FieldError;

/// A failure raised by the HTTP transport client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportFailure {
    /// HTTP status code. `None` or `0` means the request never got a response.
    #[serde(default)]
    pub status: Option<u16>,
    /// Application error code from the response body, e.g. `validation_error`.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    /// Server trace id, surfaced to users as a correlation id.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Field-level validation entries.
    #[serde(default)]
    pub details: Vec<FieldError>,
    /// Server-provided `Retry-After`, in milliseconds.
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

impl TransportFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = details;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// The status code, with `0` normalised to `None`.
    pub fn effective_status(&self) -> Option<u16> {
        self.status.filter(|s| *s != 0)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

/// A failure with a message but no transport metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericFailure {
    /// Error type name, e.g. `AbortError`.
    #[serde(default)]
    pub name: Option<String>,
    pub message: String,
}

/// Every shape of failure the classifier understands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RawFailure {
    Transport(TransportFailure),
    Generic(GenericFailure),
    /// A bare string thrown by application code.
    Text(String),
    /// Anything else; kept verbatim for diagnostics.
    Opaque(Value),
}

impl RawFailure {
    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        Self::Transport(TransportFailure::new(Some(status), message))
    }

    /// A transport failure that never received a response.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Transport(TransportFailure::new(None, message))
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(GenericFailure {
            name: None,
            message: message.into(),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn opaque(value: impl Into<Value>) -> Self {
        Self::Opaque(value.into())
    }

    /// The transport status, if this is a transport failure with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(t) => t.effective_status(),
            _ => None,
        }
    }

    /// The diagnostic message carried by the failure.
    pub fn message(&self) -> String {
        match self {
            Self::Transport(t) => t.message.clone(),
            Self::Generic(g) => g.message.clone(),
            Self::Text(text) => text.clone(),
            Self::Opaque(value) => value.to_string(),
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(t) => match t.effective_status() {
                Some(status) => write!(f, "HTTP {}: {}", status, t.message),
                None => write!(f, "transport error: {}", t.message),
            },
            Self::Generic(g) => match &g.name {
                Some(name) => write!(f, "{}: {}", name, g.message),
                None => f.write_str(&g.message),
            },
            Self::Text(text) => f.write_str(text),
            Self::Opaque(value) => write!(f, "{}", value),
        }
    }
}

impl From<TransportFailure> for RawFailure {
    fn from(failure: TransportFailure) -> Self {
        Self::Transport(failure)
    }
}

impl From<GenericFailure> for RawFailure {
    fn from(failure: GenericFailure) -> Self {
        Self::Generic(failure)
    }
}

impl From<&str> for RawFailure {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RawFailure {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Exposes a [`RawFailure`] view of an error so it can be classified without
/// giving up ownership of the original value.
pub trait AsRawFailure {
    fn as_raw_failure(&self) -> RawFailure;
}

impl AsRawFailure for RawFailure {
    fn as_raw_failure(&self) -> RawFailure {
        self.clone()
    }
}

impl AsRawFailure for TransportFailure {
    fn as_raw_failure(&self) -> RawFailure {
        RawFailure::Transport(self.clone())
    }
}

impl AsRawFailure for GenericFailure {
    fn as_raw_failure(&self) -> RawFailure {
        RawFailure::Generic(self.clone())
    }
}

impl AsRawFailure for String {
    fn as_raw_failure(&self) -> RawFailure {
        RawFailure::Text(self.clone())
    }
}

impl AsRawFailure for std::io::Error {
    fn as_raw_failure(&self) -> RawFailure {
        let name = match self.kind() {
            std::io::ErrorKind::TimedOut => Some("TimeoutError".to_string()),
            _ => None,
        };
        RawFailure::Generic(GenericFailure {
            name,
            message: self.to_string(),
        })
    }
}

impl AsRawFailure for reqwest::Error {
    fn as_raw_failure(&self) -> RawFailure {
        if self.is_timeout() {
            return RawFailure::Generic(GenericFailure {
                name: Some("TimeoutError".to_string()),
                message: format!("request timeout: {}", self),
            });
        }
        let status = self.status().map(|s| s.as_u16());
        RawFailure::Transport(TransportFailure::new(status, self.to_string()))
    }
}
