//! Failure taxonomy and classification
//!
//! This module turns raw failures from the transport layer into structured
//! [`ErrorDetails`]: a closed [`ErrorKind`], an ordered [`Severity`], a message
//! safe to show users, and the [`RecoveryAction`]s they can take.

pub mod classification;
pub mod classifier;
pub mod humanize;
pub mod raw;

// Re-export main types for convenient access
pub use classification::{
    ActionHandler, ErrorDetails, ErrorKind, FieldError, RecoveryAction, RecoveryActionKind,
    Severity, CONTEXT_ORIGINAL_ERROR, CONTEXT_WAS_OFFLINE,
};
pub use classifier::{
    classify, is_retryable, recovery_actions_for, Connectivity, ErrorClassifier, KeywordRule,
};
pub use raw::{AsRawFailure, GenericFailure, RawFailure, TransportFailure};
