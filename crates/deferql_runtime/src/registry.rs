//! Deferral registry.
//!
//! Per-request bookkeeping keyed by [`FieldPath`]: the resolvers waiting
//! for a later round, the paths resolved in the current round, and the
//! result tree materialized so far. The registry is plain data; the
//! async resolve protocol on top of it lives in [`crate::session`].

use crate::path::FieldPath;
use crate::resolver::{ResolverFuture, ResolverResult};
use crate::response::{FieldError, Response};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;

/// A resolver closed over its field's parent, arguments and context.
pub type DeferredResolver = Box<dyn FnOnce() -> ResolverFuture + Send>;

/// Deferred resolvers and materialized results of one request.
#[derive(Default)]
pub struct DeferRegistry {
    deferred: IndexMap<FieldPath, DeferredResolver>,
    resolved: Vec<FieldPath>,
    result: Response,
}

impl DeferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a materialized value at `data.<path>`.
    ///
    /// Only a fully present key chain counts as found; a found `null`
    /// means the field resolved to null.
    pub fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        self.result.data.as_ref().and_then(|data| path.lookup(data))
    }

    pub fn is_deferred(&self, path: &FieldPath) -> bool {
        self.deferred.contains_key(path)
    }

    /// Registers a resolver for a later round.
    ///
    /// Returns the resolver back if `path` is already registered; the
    /// existing registration wins.
    pub fn register(
        &mut self,
        path: FieldPath,
        resolver: DeferredResolver,
    ) -> Result<(), DeferredResolver> {
        if self.deferred.contains_key(&path) {
            return Err(resolver);
        }
        self.deferred.insert(path, resolver);
        Ok(())
    }

    /// Removes the resolver registered at `path` and records the path as
    /// resolved in the current round.
    pub fn take(&mut self, path: &FieldPath) -> Option<DeferredResolver> {
        let resolver = self.deferred.shift_remove(path)?;
        self.resolved.push(path.clone());
        Some(resolver)
    }

    /// Takes every remaining registration in registration order, marking
    /// each path resolved.
    pub fn take_all(&mut self) -> Vec<(FieldPath, DeferredResolver)> {
        let taken: Vec<_> = self.deferred.drain(..).collect();
        self.resolved.extend(taken.iter().map(|(path, _)| path.clone()));
        taken
    }

    pub fn pending_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Registered paths in registration order.
    pub fn pending_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.deferred.keys()
    }

    /// Paths resolved since the last [`DeferRegistry::take_resolved`].
    pub fn resolved_this_round(&self) -> &[FieldPath] {
        &self.resolved
    }

    /// Returns and clears the resolved set.
    pub fn take_resolved(&mut self) -> Vec<FieldPath> {
        std::mem::take(&mut self.resolved)
    }

    pub fn result(&self) -> &Response {
        &self.result
    }

    /// Installs a round's output as the result tree.
    ///
    /// The data is replaced; errors accumulate, so a field that failed in
    /// an earlier round and is now served from the tree keeps its error.
    pub fn replace_result(&mut self, result: Response) {
        let mut errors = self.result.errors.take().unwrap_or_default();
        for error in result.errors.into_iter().flatten() {
            if !errors.contains(&error) {
                errors.push(error);
            }
        }
        self.result = Response {
            data: result.data,
            errors: (!errors.is_empty()).then_some(errors),
        };
    }

    /// Writes a resolver's outcome into the result tree at `path`.
    ///
    /// A failure is stored as `null` plus an error at `path`.
    pub fn materialize(&mut self, path: &FieldPath, outcome: ResolverResult) {
        let mut errors = Vec::new();
        let value = outcome.unwrap_or_else(|e| {
            errors.push(FieldError::new(e.to_string()).with_path(path.clone()));
            Value::Null
        });
        let data = self
            .result
            .data
            .get_or_insert_with(|| Value::Object(Map::new()));
        if !path.insert(data, value) {
            errors.push(
                FieldError::new(format!("No parent object for deferred field `{}`", path))
                    .with_path(path.clone()),
            );
        }
        if !errors.is_empty() {
            self.result
                .errors
                .get_or_insert_with(Vec::new)
                .extend(errors);
        }
    }
}

impl fmt::Debug for DeferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferRegistry")
            .field("deferred", &self.deferred.keys().collect::<Vec<_>>())
            .field("resolved", &self.resolved)
            .field("has_data", &self.result.data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverError;
    use serde_json::json;

    fn constant(value: Value) -> DeferredResolver {
        Box::new(move || -> ResolverFuture { Box::pin(async move { Ok(value) }) })
    }

    #[test]
    fn test_lookup_uses_result_tree() {
        let mut registry = DeferRegistry::new();
        let path = FieldPath::from_iter(["user", "bio"]);
        assert!(registry.lookup(&path).is_none());

        registry.replace_result(Response::data(json!({"user": {"bio": null}})));
        assert_eq!(registry.lookup(&path), Some(&Value::Null));
    }

    #[test]
    fn test_register_is_first_wins() {
        let mut registry = DeferRegistry::new();
        let path = FieldPath::from_iter(["user", "bio"]);

        assert!(registry.register(path.clone(), constant(json!(1))).is_ok());
        assert!(registry.register(path.clone(), constant(json!(2))).is_err());
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.is_deferred(&path));
    }

    #[tokio::test]
    async fn test_take_marks_resolved_once() {
        let mut registry = DeferRegistry::new();
        let path = FieldPath::from_iter(["user", "bio"]);
        registry
            .register(path.clone(), constant(json!("hello")))
            .unwrap_or_else(|_| panic!("fresh path"));

        let resolver = registry.take(&path).unwrap();
        assert!(registry.take(&path).is_none());
        assert!(!registry.has_pending());
        assert_eq!(registry.resolved_this_round(), &[path.clone()]);
        assert_eq!(resolver().await.unwrap(), json!("hello"));

        assert_eq!(registry.take_resolved(), vec![path]);
        assert!(registry.resolved_this_round().is_empty());
    }

    #[tokio::test]
    async fn test_take_all_marks_every_path_resolved() {
        let mut registry = DeferRegistry::new();
        let a = FieldPath::from_iter(["a"]);
        let b = FieldPath::from_iter(["b"]);
        let _ = registry.register(a.clone(), constant(json!(1)));
        let _ = registry.register(b.clone(), constant(json!(2)));

        let taken = registry.take_all();
        assert!(!registry.has_pending());
        assert_eq!(registry.take_resolved(), vec![a.clone(), b]);

        let (path, resolver) = taken.into_iter().next().unwrap();
        assert_eq!(path, a);
        assert_eq!(resolver().await.unwrap(), json!(1));
    }

    #[test]
    fn test_replace_result_keeps_earlier_errors() {
        let mut registry = DeferRegistry::new();
        let broken = FieldError::new("down").with_path(FieldPath::from_iter(["broken"]));
        registry.replace_result(Response::round(json!({"broken": null}), vec![broken.clone()]));

        // The next round serves `broken` from the tree and reports nothing.
        registry.replace_result(Response::data(json!({"broken": null, "later": "x"})));
        assert_eq!(registry.result().errors, Some(vec![broken.clone()]));

        // The same error reported again is not duplicated.
        let late = FieldError::new("late").with_path(FieldPath::from_iter(["later"]));
        registry.replace_result(Response::round(
            json!({"broken": null, "later": null}),
            vec![broken.clone(), late.clone()],
        ));
        assert_eq!(registry.result().errors, Some(vec![broken, late]));
        assert_eq!(registry.lookup(&FieldPath::from_iter(["later"])), Some(&Value::Null));
    }

    #[test]
    fn test_materialize() {
        let mut registry = DeferRegistry::new();
        registry.replace_result(Response::data(json!({"user": {"name": "Alice"}})));

        let bio = FieldPath::from_iter(["user", "bio"]);
        registry.materialize(&bio, Ok(json!("Hello")));
        assert_eq!(registry.lookup(&bio), Some(&json!("Hello")));
        assert!(registry.result().errors.is_none());

        let avatar = FieldPath::from_iter(["user", "avatar"]);
        registry.materialize(&avatar, Err(ResolverError::Custom("cdn down".to_string())));
        assert_eq!(registry.lookup(&avatar), Some(&Value::Null));

        let orphan = FieldPath::from_iter(["user", "name", "first"]);
        registry.materialize(&orphan, Ok(json!("A")));

        let errors = registry.result().errors.clone().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "cdn down");
        assert_eq!(errors[0].path, Some(avatar));
        assert_eq!(errors[1].path, Some(orphan));
    }
}
