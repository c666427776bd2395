//! Execution session state and the deferral protocol.
//!
//! A [`DeferSession`] owns the [`DeferRegistry`] and the session flags of
//! one request. Every operation inspects and updates the registry under a
//! short lock and runs the chosen resolver after releasing it, so a path's
//! registered resolver is handed out at most once even when fields resolve
//! on several tasks.

use crate::config::DeferConfig;
use crate::path::FieldPath;
use crate::registry::{DeferRegistry, DeferredResolver};
use crate::resolver::ResolverResult;
use crate::response::Response;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, trace};

/// Flags and budgets of one execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Cleared for good once a budget trips.
    pub defer_more_allowed: bool,
    /// Set when the initial response has been handed to the stream.
    pub streaming_active: bool,
    /// Absolute end of the time budget.
    pub deadline: Option<Instant>,
    /// Nesting budget.
    pub max_rounds: Option<usize>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            defer_more_allowed: true,
            streaming_active: false,
            deadline: None,
            max_rounds: None,
        }
    }
}

impl SessionState {
    /// Returns true if the deadline is set and has passed.
    pub fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Returns true if the nesting counter reached the budget.
    pub fn rounds_exhausted(&self, nested: usize) -> bool {
        self.max_rounds.is_some_and(|max| nested >= max)
    }
}

/// What [`DeferSession::defer`] did with a field.
#[derive(Debug)]
pub enum Deferral {
    /// The resolver was registered; the field stays out of this round.
    Pending,
    /// The field has a value (materialized earlier or resolved now).
    Resolved(ResolverResult),
}

#[derive(Debug, Default)]
struct Inner {
    registry: DeferRegistry,
    state: SessionState,
}

/// Deferral state of one request.
#[derive(Debug, Default)]
pub struct DeferSession {
    config: DeferConfig,
    inner: Mutex<Inner>,
}

impl DeferSession {
    /// Creates a session with the given budgets.
    pub fn new(config: DeferConfig) -> Self {
        let state = SessionState {
            max_rounds: config.round_budget(),
            ..SessionState::default()
        };
        Self {
            config,
            inner: Mutex::new(Inner {
                registry: DeferRegistry::new(),
                state,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves the registry consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().state.streaming_active
    }

    pub fn defer_more_allowed(&self) -> bool {
        self.lock().state.defer_more_allowed
    }

    pub fn pending_count(&self) -> usize {
        self.lock().registry.pending_count()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().registry.has_pending()
    }

    pub fn pending_paths(&self) -> Vec<FieldPath> {
        self.lock().registry.pending_paths().cloned().collect()
    }

    /// Returns a copy of the materialized value at `path`.
    pub fn lookup(&self, path: &FieldPath) -> Option<Value> {
        self.lock().registry.lookup(path).cloned()
    }

    /// Returns a copy of the current result tree.
    pub fn result(&self) -> Response {
        self.lock().registry.result().clone()
    }

    /// Installs the initial result tree and starts the time budget.
    pub fn begin_streaming(&self, initial: Response) {
        let deadline = self.config.deadline_from(Instant::now());
        let mut inner = self.lock();
        inner.registry.replace_result(initial);
        inner.state.streaming_active = true;
        inner.state.deadline = deadline;
    }

    /// Stops honoring new defer requests. There is no way back.
    pub fn disallow_further_deferral(&self) {
        self.lock().state.defer_more_allowed = false;
    }

    /// Replaces the result tree with a round's output.
    pub fn replace_result(&self, result: Response) {
        self.lock().registry.replace_result(result);
    }

    /// Returns and clears the paths resolved this round.
    pub fn take_resolved(&self) -> Vec<FieldPath> {
        self.lock().registry.take_resolved()
    }

    /// Claims every registration still pending, marking each resolved.
    ///
    /// The draining round uses this for entries its walk did not reach.
    pub fn take_pending(&self) -> Vec<(FieldPath, DeferredResolver)> {
        self.lock().registry.take_all()
    }

    /// Writes a claimed resolver's outcome into the result tree.
    pub fn materialize(&self, path: &FieldPath, outcome: ResolverResult) {
        self.lock().registry.materialize(path, outcome);
    }

    /// Defers a field, or resolves it if deferring is not possible.
    ///
    /// A materialized value is returned as-is without touching `resolver`.
    /// If `path` is already registered (a later round reached it again) or
    /// deferral has been disabled, the field resolves now through
    /// [`DeferSession::resolve`]. Otherwise `resolver` is registered and
    /// the field is pending.
    pub async fn defer(&self, path: &FieldPath, resolver: DeferredResolver) -> Deferral {
        let run = {
            let mut inner = self.lock();
            if let Some(value) = inner.registry.lookup(path) {
                trace!(%path, "deferred field already materialized");
                return Deferral::Resolved(Ok(value.clone()));
            }
            if inner.registry.is_deferred(path) || !inner.state.defer_more_allowed {
                claim(&mut inner.registry, path, resolver)
            } else {
                debug!(%path, "deferring field");
                // Cannot fail: `is_deferred` was checked under the same lock.
                let _ = inner.registry.register(path.clone(), resolver);
                return Deferral::Pending;
            }
        };
        Deferral::Resolved(run().await)
    }

    /// Resolves a non-deferred field once streaming has begun.
    ///
    /// Later rounds walk the whole operation again; fields materialized in
    /// an earlier round are answered from the result tree instead of
    /// running their resolver a second time. A registration left at `path`
    /// is claimed like in [`DeferSession::resolve`].
    pub async fn find_or_resolve(
        &self,
        path: &FieldPath,
        original: DeferredResolver,
    ) -> ResolverResult {
        let run = {
            let mut inner = self.lock();
            if let Some(value) = inner.registry.lookup(path) {
                return Ok(value.clone());
            }
            claim(&mut inner.registry, path, original)
        };
        run().await
    }

    /// Runs the deferred resolver for `path` if one is registered,
    /// otherwise `original`.
    pub async fn resolve(&self, path: &FieldPath, original: DeferredResolver) -> ResolverResult {
        let run = claim(&mut self.lock().registry, path, original);
        run().await
    }
}

/// Picks the resolver to run for `path`, consuming its registration.
fn claim(
    registry: &mut DeferRegistry,
    path: &FieldPath,
    original: DeferredResolver,
) -> DeferredResolver {
    match registry.take(path) {
        Some(deferred) => {
            debug!(%path, "resolving deferred field");
            deferred
        }
        None => original,
    }
}
