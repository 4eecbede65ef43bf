use crate::ops::OperationState;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures delivered to an operation's callback or raised while it consumes a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("Outcome unknown: connection to {address} was lost while reading the response")]
    OutcomeUnknown { address: SocketAddr },

    #[error("Unexpected response, expected {expected}: {line:?}")]
    UnexpectedResponse { expected: &'static str, line: String },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Response line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: OperationState,
        to: OperationState,
    },
}

pub type Result<T> = std::result::Result<T, OperationError>;
