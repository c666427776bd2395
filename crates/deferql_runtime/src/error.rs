//! Errors raised by the deferral engine.

use crate::path::FieldPath;
use crate::response::FieldError;
use thiserror::Error;

/// Error code attached to a defer annotation on a non-nullable field.
pub const NON_NULLABLE_DEFER: &str = "DEFER_NON_NULLABLE_FIELD";

/// Error code attached to an annotation condition that cannot be evaluated.
pub const INVALID_CONDITION: &str = "INVALID_DIRECTIVE_CONDITION";

/// Error code attached to a stream that could not be delivered.
pub const STREAM_ERROR: &str = "STREAM_ERROR";

/// Errors produced while deciding or delivering deferred fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeferError {
    /// A field whose type is non-nullable carries a defer annotation.
    #[error("The @defer directive cannot be used on a non-nullable field of type `{field_type}`")]
    NonNullableDefer { field_type: String },

    /// A condition references a variable the request did not provide.
    #[error("Variable `${name}` used in a directive condition is not defined")]
    UnboundVariable { name: String },

    /// A condition references a variable that is not a boolean.
    #[error("Variable `${name}` used in a directive condition must be a boolean, found {found}")]
    InvalidCondition { name: String, found: String },

    /// The chunk sink went away.
    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl DeferError {
    /// Returns the client-facing error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NonNullableDefer { .. } => NON_NULLABLE_DEFER,
            Self::UnboundVariable { .. } | Self::InvalidCondition { .. } => INVALID_CONDITION,
            Self::Emit(_) => STREAM_ERROR,
        }
    }

    /// Returns true if the error is caused by the request itself.
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Emit(_))
    }

    /// Converts into a response error located at `path`.
    pub fn into_field_error(self, path: Option<FieldPath>) -> FieldError {
        let code = self.code();
        let error = FieldError::new(self.to_string()).with_code(code);
        match path {
            Some(path) => error.with_path(path),
            None => error,
        }
    }
}

impl From<DeferError> for FieldError {
    fn from(error: DeferError) -> Self {
        error.into_field_error(None)
    }
}

/// Errors raised by a stream emitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The receiving side of the stream has been dropped.
    #[error("stream receiver closed")]
    Closed,

    /// A chunk could not be serialized.
    #[error("failed to encode chunk: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for EmitError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encode(error.to_string())
    }
}
