//! Errors surfaced by the reliability runtime.

use rampart_core::{ErrorKind, OperationError};
use thiserror::Error;

/// Errors from protected execution.
///
/// [`ReliabilityError::CircuitOpen`] is infrastructure self-protection and is
/// kept distinct from [`ReliabilityError::Operation`], which carries the
/// downstream failure unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReliabilityError {
    #[error("Circuit breaker open for '{name}'")]
    CircuitOpen { name: String },

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Agent not registered: {0}")]
    UnknownAgent(String),
}

impl ReliabilityError {
    /// Kind recorded against breakers and health when this error is observed.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReliabilityError::CircuitOpen { .. } => ErrorKind::ServiceUnavailable,
            ReliabilityError::Operation(err) => err.kind,
            ReliabilityError::UnknownAgent(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ReliabilityError::CircuitOpen { .. })
    }

    /// The downstream error, if this is one.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            ReliabilityError::Operation(err) => Some(err),
            _ => None,
        }
    }
}
