//! Round-based `@defer` execution.
//!
//! This crate resolves a query whose fields may be deferred, answering
//! with a partial result first and streaming the rest in later rounds:
//! - `query`: Query plans and field annotations
//! - `path`: Field paths keying all deferral state
//! - `eligibility`: Whether a field may be deferred
//! - `registry`: Deferred resolvers and the result tree
//! - `session`: Per-request state and the deferral protocol
//! - `scheduler`: The round loop and its budgets
//! - `streaming`: Chunk emission and multipart framing
//! - `executor`: Reference execution engine
//! - `resolver`: Field resolvers and the request context
//! - `response`: Result trees and errors

pub mod config;
pub mod eligibility;
pub mod error;
pub mod executor;
pub mod path;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod scheduler;
pub mod session;
pub mod streaming;

pub use config::{DeferConfig, DeferOverrides};
pub use eligibility::{validate_plan, Eligibility};
pub use error::{DeferError, EmitError};
pub use executor::{ExecutionEngine, ExecutionFuture, Executor, OperationRequest};
pub use path::{FieldPath, PathSegment};
pub use query::{
    Annotation, Condition, FieldInfo, FieldNode, OperationKind, PlanNode, QueryPlan, TypeRef,
};
pub use registry::{DeferRegistry, DeferredResolver};
pub use resolver::{
    Context, PropertyResolver, Resolver, ResolverArgs, ResolverError, ResolverFuture, ResolverInfo,
    ResolverMap, ResolverResult,
};
pub use response::{FieldError, Response};
pub use scheduler::{
    DeferredExecution, DeferredStream, ExecutionOutcome, RoundReport, RoundScheduler,
    SchedulerPhase, StopReason,
};
pub use session::{DeferSession, Deferral, SessionState};
pub use streaming::{
    BufferedEmitter, ChannelEmitter, ChunkPayload, IncrementalPayload, MultipartEncoder,
    RoundChunk, StreamEmitter,
};
