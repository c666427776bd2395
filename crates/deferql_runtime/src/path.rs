//! Field paths.
//!
//! A [`FieldPath`] names one field occurrence in the response, from the
//! operation root down through response keys (aliases) and list indices.
//! Paths are the keys of all deferral bookkeeping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Position of a field occurrence in the response tree.
///
/// Paths are immutable; [`FieldPath::child`] and [`FieldPath::index`]
/// return extended copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path (the operation root).
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns this path extended by a response key.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(key.into()));
        Self(segments)
    }

    /// Returns this path extended by a list index.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Follows the path through `data`.
    ///
    /// Returns `Some` only when every key and index along the way exists.
    /// A present `null` is returned as `Some(&Value::Null)`, so callers can
    /// tell a field that resolved to null from one that was never written.
    pub fn lookup<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(data, |value, segment| match segment {
            PathSegment::Field(key) => value.as_object()?.get(key),
            PathSegment::Index(i) => value.as_array()?.get(*i),
        })
    }

    /// Writes `value` at this path inside `data`.
    ///
    /// Missing objects along the way are created; list items must already
    /// exist. Returns false if the path runs into a scalar, a `null` or a
    /// missing list item.
    pub fn insert(&self, data: &mut Value, value: Value) -> bool {
        let Some((last, parents)) = self.0.split_last() else {
            *data = value;
            return true;
        };
        let mut slot = data;
        for segment in parents {
            let next = match segment {
                PathSegment::Field(key) => slot.as_object_mut().map(|map| {
                    map.entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                }),
                PathSegment::Index(i) => slot.as_array_mut().and_then(|items| items.get_mut(*i)),
            };
            match next {
                Some(next) => slot = next,
                None => return false,
            }
        }
        match (last, slot) {
            (PathSegment::Field(key), Value::Object(map)) => {
                map.insert(key.clone(), value);
                true
            }
            (PathSegment::Index(i), Value::Array(items)) if *i < items.len() => {
                items[*i] = value;
                true
            }
            _ => false,
        }
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for FieldPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
