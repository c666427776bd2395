//! Reference execution engine.
//!
//! Walks a [`QueryPlan`] against a root value and a [`ResolverMap`]. When
//! run inside a [`DeferSession`] every field resolution goes through the
//! session, so one [`ExecutionEngine::evaluate`] call is one round: pending
//! deferred fields are left out of the output and previously materialized
//! fields are answered from the result tree.

use crate::eligibility::{validate_plan, Eligibility};
use crate::path::FieldPath;
use crate::query::{FieldInfo, OperationKind, PlanNode, QueryPlan};
use crate::registry::DeferredResolver;
use crate::resolver::{Context, ResolverArgs, ResolverInfo, ResolverMap};
use crate::response::{FieldError, Response};
use crate::session::{DeferSession, Deferral};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Future returned by an execution round.
pub type ExecutionFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// The underlying execution engine driven by the round scheduler.
///
/// `evaluate` walks the whole operation once and returns the complete
/// result tree for this round, resolving fields through `session`.
pub trait ExecutionEngine: Send + Sync {
    fn evaluate<'a>(&'a self, session: &'a Arc<DeferSession>) -> ExecutionFuture<'a>;

    /// Request-level checks run before the first round.
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Ok(())
    }
}

/// The query executor.
#[derive(Clone, Default)]
pub struct Executor {
    resolvers: Arc<ResolverMap>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor over `resolvers`.
    pub fn with_resolvers(resolvers: ResolverMap) -> Self {
        Self {
            resolvers: Arc::new(resolvers),
        }
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Executes a query plan in one pass, ignoring defer annotations.
    pub async fn execute(&self, plan: &QueryPlan, ctx: &Context) -> Response {
        self.run(plan, empty_root(), ctx, None).await
    }

    /// Binds a plan and its context into an engine for deferred execution.
    pub fn request(&self, plan: Arc<QueryPlan>, ctx: Context) -> OperationRequest {
        OperationRequest {
            executor: self.clone(),
            plan,
            ctx,
            root: empty_root(),
        }
    }

    async fn run(
        &self,
        plan: &QueryPlan,
        root: Value,
        ctx: &Context,
        session: Option<Arc<DeferSession>>,
    ) -> Response {
        let exec_ctx = ExecutionContext {
            ctx: ctx.clone(),
            resolvers: Arc::clone(&self.resolvers),
            operation: plan.operation_kind,
            errors: Arc::new(RwLock::new(Vec::new())),
            session,
        };

        let data = execute_node(&plan.root, root, FieldPath::root(), &exec_ctx).await;

        let errors = exec_ctx.errors.read().await.clone();
        Response::round(data, errors)
    }
}

fn empty_root() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One operation bound to its executor, context and root value.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    executor: Executor,
    plan: Arc<QueryPlan>,
    ctx: Context,
    root: Value,
}

impl OperationRequest {
    /// Sets the value the root fields are resolved against.
    pub fn with_root(mut self, root: Value) -> Self {
        self.root = root;
        self
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl ExecutionEngine for OperationRequest {
    fn evaluate<'a>(&'a self, session: &'a Arc<DeferSession>) -> ExecutionFuture<'a> {
        Box::pin(self.executor.run(
            &self.plan,
            self.root.clone(),
            &self.ctx,
            Some(Arc::clone(session)),
        ))
    }

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        validate_plan(&self.plan, &self.ctx.variables)
    }
}

#[derive(Clone)]
struct ExecutionContext {
    ctx: Context,
    resolvers: Arc<ResolverMap>,
    operation: OperationKind,
    errors: Arc<RwLock<Vec<FieldError>>>,
    session: Option<Arc<DeferSession>>,
}

impl ExecutionContext {
    async fn record(&self, error: FieldError) {
        self.errors.write().await.push(error);
    }
}

/// Executes a plan node.
fn execute_node<'a>(
    node: &'a PlanNode,
    parent: Value,
    path: FieldPath,
    ctx: &'a ExecutionContext,
) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
    Box::pin(async move {
        match node {
            PlanNode::Sequence { nodes } => execute_sequence(nodes, parent, path, ctx).await,
            PlanNode::Parallel { nodes } => execute_parallel(nodes, parent, path, ctx).await,
            PlanNode::Field { info, children } => {
                execute_field(info, Some(children), parent, path, ctx).await
            }
            PlanNode::Leaf { field } => execute_field(field, None, parent, path, ctx).await,
        }
    })
}

/// Runs nodes one after another, merging their objects.
async fn execute_sequence(
    nodes: &[PlanNode],
    parent: Value,
    path: FieldPath,
    ctx: &ExecutionContext,
) -> Value {
    let mut result = serde_json::Map::new();

    for node in nodes {
        let value = execute_node(node, parent.clone(), path.clone(), ctx).await;
        if let Value::Object(map) = value {
            result.extend(map);
        }
    }

    Value::Object(result)
}

/// Runs sibling nodes as separate tasks and merges their objects.
async fn execute_parallel(
    nodes: &[PlanNode],
    parent: Value,
    path: FieldPath,
    ctx: &ExecutionContext,
) -> Value {
    let mut handles = Vec::with_capacity(nodes.len());

    for node in nodes {
        let parent = parent.clone();
        let path = path.clone();
        let local_ctx = ctx.clone();
        let node = node.clone();

        handles.push(tokio::spawn(async move {
            execute_node(&node, parent, path, &local_ctx).await
        }));
    }

    let mut result = serde_json::Map::new();

    for handle in handles {
        match handle.await {
            Ok(Value::Object(map)) => result.extend(map),
            Ok(_) => {}
            Err(e) => {
                ctx.record(FieldError::new(format!("Parallel execution failed: {}", e))).await;
            }
        }
    }

    Value::Object(result)
}

/// Executes a field, returning `{ <response key>: value }`.
///
/// Excluded fields and fields still pending a later round produce an
/// empty object, so their key is absent from the round's output.
async fn execute_field(
    info: &FieldInfo,
    children: Option<&PlanNode>,
    parent: Value,
    path: FieldPath,
    ctx: &ExecutionContext,
) -> Value {
    let response_key = info.response_key();
    let field_path = path.child(response_key);
    let mut obj = serde_json::Map::new();

    match info.is_included(&ctx.ctx.variables) {
        Ok(true) => {}
        Ok(false) => return Value::Object(obj),
        Err(e) => {
            ctx.record(e.into_field_error(Some(field_path))).await;
            obj.insert(response_key.to_string(), Value::Null);
            return Value::Object(obj);
        }
    }

    let value = match resolve_field(info, &parent, &field_path, ctx).await {
        FieldOutcome::Pending => return Value::Object(obj),
        FieldOutcome::Resolved(value) => value,
    };

    let value = match children {
        Some(children) => complete_value(children, value, field_path, ctx).await,
        None => value,
    };

    obj.insert(response_key.to_string(), value);
    Value::Object(obj)
}

/// Runs the selection of a composite field against its resolved value.
fn complete_value<'a>(
    children: &'a PlanNode,
    value: Value,
    path: FieldPath,
    ctx: &'a ExecutionContext,
) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
    Box::pin(async move {
        match value {
            Value::Array(items) => {
                let mut results = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    results.push(complete_value(children, item, path.index(i), ctx).await);
                }
                Value::Array(results)
            }
            Value::Null => Value::Null,
            other => execute_node(children, other, path, ctx).await,
        }
    })
}

enum FieldOutcome {
    /// Registered for a later round.
    Pending,
    Resolved(Value),
}

/// Resolves a single field.
async fn resolve_field(
    info: &FieldInfo,
    parent: &Value,
    path: &FieldPath,
    ctx: &ExecutionContext,
) -> FieldOutcome {
    if info.is_typename() {
        return FieldOutcome::Resolved(Value::String(info.parent_type.clone()));
    }

    let original = bind_resolver(info, parent, path, ctx);

    let result = match &ctx.session {
        None => original().await,
        Some(session) => {
            let eligibility = Eligibility::new(ctx.operation, &ctx.ctx.variables);
            match eligibility.should_defer_field(info) {
                Ok(true) => match session.defer(path, original).await {
                    Deferral::Pending => return FieldOutcome::Pending,
                    Deferral::Resolved(result) => result,
                },
                Ok(false) if session.is_streaming() => {
                    session.find_or_resolve(path, original).await
                }
                Ok(false) => session.resolve(path, original).await,
                Err(e) => {
                    ctx.record(e.into_field_error(Some(path.clone()))).await;
                    return FieldOutcome::Resolved(Value::Null);
                }
            }
        }
    };

    match result {
        Ok(value) => FieldOutcome::Resolved(value),
        Err(e) => {
            ctx.record(FieldError::new(e.to_string()).with_path(path.clone())).await;
            FieldOutcome::Resolved(Value::Null)
        }
    }
}

/// Closes the field's resolver over its parent, arguments and context.
fn bind_resolver(
    info: &FieldInfo,
    parent: &Value,
    path: &FieldPath,
    ctx: &ExecutionContext,
) -> DeferredResolver {
    let resolver = ctx.resolvers.get(&info.parent_type, &info.name);
    let args = ResolverArgs::from(info.arguments.clone());
    let resolver_info = ResolverInfo::for_field(info, path.clone());
    let parent = parent.clone();
    let user_ctx = ctx.ctx.clone();
    Box::new(move || resolver.resolve(parent, args, user_ctx, resolver_info))
}
