//! Error taxonomy and classification.
//!
//! Every operation wrapped by rampart fails with an [`OperationError`] that
//! carries an explicit [`ErrorKind`]. Classification is a total match over
//! the kind:
//! - [`ErrorKind::severity`] places the kind into one of four tiers
//! - [`ErrorKind::is_retryable`] decides whether another attempt is worth it
//!
//! Retryability is independent of severity. A HIGH-severity kind such as
//! [`ErrorKind::Permission`] is still never retried.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Severity tier of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of failure reported by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Process-fatal
    ResourceExhausted,
    Memory,
    Recursion,
    Terminated,

    // Connectivity and access
    Connection,
    Timeout,
    Auth,
    Permission,
    Cancelled,

    // Bad input or unavailable dependency
    MalformedRequest,
    Validation,
    Value,
    ServiceUnavailable,
    RateLimited,

    // Programmer errors and everything else
    Type,
    Key,
    Attribute,
    NotImplemented,
    NotFound,
    Import,
    Other,
}

impl ErrorKind {
    /// Severity tier for this kind.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::ResourceExhausted
            | ErrorKind::Memory
            | ErrorKind::Recursion
            | ErrorKind::Terminated => Severity::Critical,

            ErrorKind::Connection
            | ErrorKind::Timeout
            | ErrorKind::Auth
            | ErrorKind::Permission
            | ErrorKind::Cancelled => Severity::High,

            ErrorKind::MalformedRequest
            | ErrorKind::Validation
            | ErrorKind::Value
            | ErrorKind::ServiceUnavailable
            | ErrorKind::RateLimited => Severity::Medium,

            ErrorKind::Type
            | ErrorKind::Key
            | ErrorKind::Attribute
            | ErrorKind::NotImplemented
            | ErrorKind::NotFound
            | ErrorKind::Import
            | ErrorKind::Other => Severity::Low,
        }
    }

    /// Whether a failure of this kind may succeed on another attempt.
    ///
    /// Client and programmer errors are never retried, whatever their severity.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::Type
                | ErrorKind::Value
                | ErrorKind::Key
                | ErrorKind::Attribute
                | ErrorKind::NotImplemented
                | ErrorKind::Permission
                | ErrorKind::NotFound
                | ErrorKind::Import
        )
    }

    /// Stable snake_case name, used as the metrics key.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Memory => "memory",
            ErrorKind::Recursion => "recursion",
            ErrorKind::Terminated => "terminated",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::Permission => "permission",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::Validation => "validation",
            ErrorKind::Value => "value",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Type => "type",
            ErrorKind::Key => "key",
            ErrorKind::Attribute => "attribute",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Import => "import",
            ErrorKind::Other => "other",
        }
    }

    /// Best-effort classification of free-form error text.
    ///
    /// Meant for errors that cross the boundary as strings (HTTP client
    /// failures, provider responses). Patterns are checked in order; the
    /// first match wins and unmatched text is [`ErrorKind::Other`].
    pub fn from_message(message: &str) -> ErrorKind {
        MESSAGE_PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Other)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref MESSAGE_PATTERNS: Vec<(Regex, ErrorKind)> = {
        let table: &[(&str, ErrorKind)] = &[
            (r"(?i)out of memory|\boom\b|memory (limit|exhausted)", ErrorKind::Memory),
            (r"(?i)recursion|stack overflow", ErrorKind::Recursion),
            (r"(?i)resource exhausted|too many open files|no space left", ErrorKind::ResourceExhausted),
            (r"(?i)\b(sigterm|sigkill|terminated|interrupted)\b", ErrorKind::Terminated),
            (r"(?i)\b429\b|rate.?limit|too many requests", ErrorKind::RateLimited),
            (r"(?i)timed? ?out|deadline exceeded", ErrorKind::Timeout),
            (r"(?i)\b401\b|unauthori[sz]ed|invalid api key|authentication", ErrorKind::Auth),
            (r"(?i)\b403\b|forbidden|permission denied", ErrorKind::Permission),
            (r"(?i)\b404\b|not found", ErrorKind::NotFound),
            (r"(?i)\b(502|503|504)\b|service unavailable|bad gateway|overloaded", ErrorKind::ServiceUnavailable),
            (r"(?i)\b400\b|bad request|malformed", ErrorKind::MalformedRequest),
            (r"(?i)validation|invalid", ErrorKind::Validation),
            (r"(?i)connection|connect error|broken pipe|dns|network", ErrorKind::Connection),
            (r"(?i)not implemented|unimplemented", ErrorKind::NotImplemented),
        ];
        table
            .iter()
            .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, *kind)))
            .collect()
    };
}

/// Failure returned by a wrapped operation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct OperationError {
    /// What went wrong
    pub kind: ErrorKind,

    /// Human-readable detail
    pub message: String,
}

impl OperationError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an error whose kind is inferred from its message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::from_message(&message),
            message,
        }
    }

    /// A single attempt exceeded its time bound.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Severity tier of this error.
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Whether this error may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrNotAvailable
            | Io::BrokenPipe
            | Io::UnexpectedEof => ErrorKind::Connection,
            Io::PermissionDenied => ErrorKind::Permission,
            Io::NotFound => ErrorKind::NotFound,
            Io::InvalidInput => ErrorKind::Value,
            Io::InvalidData => ErrorKind::MalformedRequest,
            Io::OutOfMemory => ErrorKind::Memory,
            Io::Interrupted => ErrorKind::Terminated,
            Io::Unsupported => ErrorKind::NotImplemented,
            _ => ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}
