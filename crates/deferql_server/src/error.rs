//! Server errors.

use std::io;
use thiserror::Error;

/// Errors raised while serving requests.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    #[error("Invalid address `{0}`")]
    InvalidAddress(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("operationName is required, {available} operations are registered")]
    OperationRequired { available: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ServerError {
    /// Returns the client-facing error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) | Self::Bind { .. } | Self::Accept(_) => "INTERNAL_ERROR",
            Self::UnknownOperation(_) | Self::OperationRequired { .. } => "UNKNOWN_OPERATION",
            Self::InvalidRequest(_) => "BAD_REQUEST",
        }
    }

    /// Returns true if the error is caused by the request itself.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation(_) | Self::OperationRequired { .. } | Self::InvalidRequest(_)
        )
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
