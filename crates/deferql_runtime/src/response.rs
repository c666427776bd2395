//! Result trees and GraphQL errors.

use crate::path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A result tree: the response of one round, or of a whole request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl Response {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    /// A round's output; an empty error list is left out of the JSON.
    pub fn round(data: Value, errors: Vec<FieldError>) -> Self {
        Self {
            data: Some(data),
            errors: (!errors.is_empty()).then_some(errors),
        }
    }

    /// A request refused before execution; carries no data at all.
    pub fn rejected(errors: Vec<FieldError>) -> Self {
        Self {
            data: None,
            errors: Some(errors),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Errors located at `path` or below it.
    pub fn errors_under<'a>(&'a self, path: &'a FieldPath) -> impl Iterator<Item = &'a FieldError> {
        self.errors
            .iter()
            .flatten()
            .filter(move |error| error.path.as_ref().is_some_and(|p| p.starts_with(path)))
    }
}

/// A GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: FieldPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Sets `extensions.code`.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", Value::String(code.into()))
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|extensions| extensions.get("code"))
            .and_then(Value::as_str)
    }
}
