//! The deferql server.
//!
//! Serves persisted operations: clients send an operation name and
//! variables, the server looks up the registered [`QueryPlan`] and runs it
//! with deferral enabled.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use deferql_runtime::{
    Context, DeferOverrides, DeferredExecution, ExecutionOutcome, Executor, OperationRequest,
    QueryPlan, ResolverArgs, ResolverInfo, ResolverMap, ResolverResult,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Server builder.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    resolvers: ResolverMap,
    operations: FxHashMap<String, Arc<QueryPlan>>,
    root: Option<Value>,
}

impl ServerBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a sync resolver.
    pub fn resolver_fn<F>(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.resolvers.register_fn(type_name, field_name, func);
        self
    }

    /// Adds an async resolver.
    pub fn resolver_async<F, Fut>(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.resolvers.register_async(type_name, field_name, func);
        self
    }

    /// Registers a persisted operation. Plans without a name of their own
    /// take `name`.
    pub fn operation(mut self, name: impl Into<String>, plan: QueryPlan) -> Self {
        let name = name.into();
        let plan = if plan.operation_name.is_none() {
            plan.with_name(name.clone())
        } else {
            plan
        };
        self.operations.insert(name, Arc::new(plan));
        self
    }

    /// Sets the value root fields are resolved against.
    pub fn root_value(mut self, root: Value) -> Self {
        self.root = Some(root);
        self
    }

    /// Builds the server.
    pub fn build(self) -> DeferServer {
        DeferServer {
            config: self.config,
            executor: Executor::with_resolvers(self.resolvers),
            operations: self.operations,
            root: self.root.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        }
    }
}

/// A server for persisted operations with `@defer` support.
pub struct DeferServer {
    config: ServerConfig,
    executor: Executor,
    operations: FxHashMap<String, Arc<QueryPlan>>,
    root: Value,
}

impl std::fmt::Debug for DeferServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferServer")
            .field("config", &self.config)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeferServer {
    /// Creates a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Names of the registered operations.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Looks up an operation; without a name, the only registered one.
    pub fn plan(&self, name: Option<&str>) -> ServerResult<&Arc<QueryPlan>> {
        match name {
            Some(name) => self
                .operations
                .get(name)
                .ok_or_else(|| ServerError::UnknownOperation(name.to_string())),
            None if self.operations.len() == 1 => self
                .operations
                .values()
                .next()
                .ok_or(ServerError::OperationRequired { available: 0 }),
            None => Err(ServerError::OperationRequired {
                available: self.operations.len(),
            }),
        }
    }

    /// Starts the server and blocks until shutdown.
    pub async fn listen(self) -> ServerResult<()> {
        crate::http::run_server(Arc::new(self)).await
    }

    /// Executes an operation with the configured budgets.
    pub async fn execute(
        &self,
        operation_name: Option<&str>,
        variables: HashMap<String, Value>,
    ) -> ServerResult<ExecutionOutcome<OperationRequest>> {
        self.execute_with(operation_name, variables, &DeferOverrides::default())
            .await
    }

    /// Executes an operation, replacing budgets for this request only.
    pub async fn execute_with(
        &self,
        operation_name: Option<&str>,
        variables: HashMap<String, Value>,
        overrides: &DeferOverrides,
    ) -> ServerResult<ExecutionOutcome<OperationRequest>> {
        let plan = self.plan(operation_name)?;
        let config = self.config.defer.with_overrides(overrides);
        debug!(
            operation = plan.operation_name.as_deref().unwrap_or("<anonymous>"),
            max_execution_ms = config.max_execution_ms,
            max_nested_rounds = config.max_nested_rounds,
            "executing operation"
        );

        let request = self
            .executor
            .request(Arc::clone(plan), Context::with_variables(variables))
            .with_root(self.root.clone());
        Ok(DeferredExecution::new(request, config).start().await)
    }
}
