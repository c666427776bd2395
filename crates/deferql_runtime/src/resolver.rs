//! Field resolvers.
//!
//! A resolver receives owned copies of its inputs and returns a `'static`
//! future. That lets the executor close a call over its inputs and park it
//! in the deferral registry until a later round claims it.

use crate::path::FieldPath;
use crate::query::{FieldInfo, TypeRef};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type ResolverResult = Result<Value, ResolverError>;

pub type ResolverFuture = Pin<Box<dyn Future<Output = ResolverResult> + Send>>;

/// Error from a resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Cannot read `{field}` from a non-object parent")]
    NotAnObject { field: String },

    #[error("{0}")]
    Custom(String),
}

/// Request-scoped values handed to every resolver.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Operation variables; annotation conditions read them too.
    pub variables: HashMap<String, Value>,
    /// Application values, e.g. the authenticated viewer.
    pub data: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| T::deserialize(v).ok())
    }

    pub fn variable<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.variables.get(name).and_then(|v| T::deserialize(v).ok())
    }
}

/// Argument values of one field occurrence, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverArgs(IndexMap<String, Value>);

impl ResolverArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserializes an optional argument; `None` if absent or ill-typed.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| T::deserialize(v).ok())
    }

    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        let value = self
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))?;
        T::deserialize(value).map_err(|e| ResolverError::InvalidArgument {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<IndexMap<String, Value>> for ResolverArgs {
    fn from(args: IndexMap<String, Value>) -> Self {
        Self(args)
    }
}

impl FromIterator<(String, Value)> for ResolverArgs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The field occurrence a resolver is called for.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverInfo {
    pub field_name: String,
    pub parent_type: String,
    pub return_type: TypeRef,
    /// Response path of this occurrence, list indices included.
    pub path: FieldPath,
}

impl ResolverInfo {
    pub fn for_field(field: &FieldInfo, path: FieldPath) -> Self {
        Self {
            field_name: field.name.clone(),
            parent_type: field.parent_type.clone(),
            return_type: field.return_type.clone(),
            path,
        }
    }
}

/// Resolves one field of one parent value.
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        parent: Value,
        args: ResolverArgs,
        ctx: Context,
        info: ResolverInfo,
    ) -> ResolverFuture;
}

/// Reads the property named like the field from the parent object.
///
/// Used for every field without a registered resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyResolver;

impl Resolver for PropertyResolver {
    fn resolve(
        &self,
        parent: Value,
        _args: ResolverArgs,
        _ctx: Context,
        info: ResolverInfo,
    ) -> ResolverFuture {
        let result = match parent {
            Value::Object(mut map) => Ok(map.remove(&info.field_name).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::NotAnObject {
                field: info.field_name,
            }),
        };
        Box::pin(async move { result })
    }
}

struct SyncFn<F>(F);

impl<F> Resolver for SyncFn<F>
where
    F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync,
{
    fn resolve(
        &self,
        parent: Value,
        args: ResolverArgs,
        ctx: Context,
        info: ResolverInfo,
    ) -> ResolverFuture {
        let result = (self.0)(&parent, &args, &ctx, &info);
        Box::pin(async move { result })
    }
}

struct AsyncFn<F>(F);

impl<F, Fut> Resolver for AsyncFn<F>
where
    F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync,
    Fut: Future<Output = ResolverResult> + Send + 'static,
{
    fn resolve(
        &self,
        parent: Value,
        args: ResolverArgs,
        ctx: Context,
        info: ResolverInfo,
    ) -> ResolverFuture {
        Box::pin((self.0)(parent, args, ctx, info))
    }
}

/// Resolvers by parent type and field name, with a fallback for the rest.
#[derive(Clone)]
pub struct ResolverMap {
    by_type: FxHashMap<String, FxHashMap<String, Arc<dyn Resolver>>>,
    fallback: Arc<dyn Resolver>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a map that falls back to [`PropertyResolver`].
    pub fn new() -> Self {
        Self {
            by_type: FxHashMap::default(),
            fallback: Arc::new(PropertyResolver),
        }
    }

    pub fn with_fallback<R: Resolver + 'static>(mut self, resolver: R) -> Self {
        self.fallback = Arc::new(resolver);
        self
    }

    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.by_type
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Arc::new(resolver));
    }

    /// Registers a synchronous closure.
    ///
    /// The closure runs when the field is claimed, which for a deferred
    /// field is a later round.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, SyncFn(f));
    }

    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFn(f));
    }

    /// The resolver for `type_name.field_name`, or the fallback.
    pub fn get(&self, type_name: &str, field_name: &str) -> Arc<dyn Resolver> {
        self.by_type
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .unwrap_or(&self.fallback)
            .clone()
    }

    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.by_type
            .get(type_name)
            .is_some_and(|fields| fields.contains_key(field_name))
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut coordinates: Vec<String> = self
            .by_type
            .iter()
            .flat_map(|(ty, fields)| fields.keys().map(move |field| format!("{}.{}", ty, field)))
            .collect();
        coordinates.sort_unstable();
        f.debug_struct("ResolverMap")
            .field("registered", &coordinates)
            .finish_non_exhaustive()
    }
}
