//! Round scheduling for deferred execution.
//!
//! After the initial walk, the scheduler re-evaluates the operation until
//! nothing is deferred any more or a budget trips:
//!
//! ```text
//! Idle -> Streaming -> Round(1) -> ... -> Round(n) -> [Draining] -> Done
//! ```
//!
//! Each round is one full [`ExecutionEngine::evaluate`] call; the budgets
//! are only checked between rounds, so a slow round can overrun the
//! deadline by up to its own duration. When a budget trips, deferral is
//! disabled for the rest of the request and one draining round resolves
//! everything that is left.

use crate::config::DeferConfig;
use crate::error::DeferError;
use crate::executor::ExecutionEngine;
use crate::response::Response;
use crate::session::DeferSession;
use crate::streaming::{RoundChunk, StreamEmitter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Where the scheduler is in a request's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    #[default]
    Idle,
    /// Round 0 is being delivered.
    Streaming,
    /// A scheduled round is running.
    Round(usize),
    /// The forced final round is running.
    Draining,
    Done,
}

/// Why the round loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing is deferred any more.
    Completed,
    /// The time budget ran out.
    Deadline,
    /// The nesting budget ran out.
    MaxRounds,
    /// A round resolved nothing although entries remain.
    Stalled,
}

/// Summary of one streamed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Scheduled rounds after the initial response, excluding the drain.
    pub scheduled_rounds: usize,
    /// Whether a draining round ran.
    pub drained: bool,
    /// Deferred paths resolved over all rounds.
    pub resolved_paths: usize,
    pub stop: StopReason,
    pub elapsed: Duration,
}

/// Drives the rounds of one request.
#[derive(Debug, Default)]
pub struct RoundScheduler {
    phase: SchedulerPhase,
}

impl RoundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Emits `initial` as round 0, then runs rounds until done.
    ///
    /// Every chunk before the last has `is_final == false`. An emitter
    /// failure stops the request and is returned as [`DeferError::Emit`].
    #[instrument(name = "defer_stream", skip_all, fields(pending = session.pending_count()))]
    pub async fn run<E, S>(
        &mut self,
        engine: &E,
        session: &Arc<DeferSession>,
        initial: Response,
        emitter: &mut S,
    ) -> Result<RoundReport, DeferError>
    where
        E: ExecutionEngine + ?Sized,
        S: StreamEmitter + ?Sized,
    {
        let start = Instant::now();
        self.phase = SchedulerPhase::Streaming;
        session.begin_streaming(initial.clone());
        session.take_resolved();

        let pending = session.pending_count();
        info!(pending, "streaming deferred response");
        emitter
            .emit(RoundChunk {
                round: 0,
                result: initial,
                resolved: Vec::new(),
                is_final: pending == 0,
            })
            .await?;

        let mut round = 0;
        let mut resolved_paths = 0;
        let mut nested = 1;

        let stop = loop {
            if !session.has_pending() {
                break StopReason::Completed;
            }
            let state = session.state();
            if state.deadline_passed(Instant::now()) {
                break StopReason::Deadline;
            }
            if state.rounds_exhausted(nested) {
                break StopReason::MaxRounds;
            }
            nested += 1;
            round += 1;
            self.phase = SchedulerPhase::Round(round);

            session.replace_result(engine.evaluate(session).await);
            let result = session.result();
            let resolved = session.take_resolved();
            let remaining = session.pending_count();
            debug!(round, resolved = resolved.len(), pending = remaining, "round complete");
            resolved_paths += resolved.len();

            let stalled = resolved.is_empty() && remaining > 0;
            emitter
                .emit(RoundChunk {
                    round,
                    result,
                    resolved,
                    is_final: remaining == 0,
                })
                .await?;
            if stalled {
                break StopReason::Stalled;
            }
        };
        let scheduled_rounds = round;

        let drained = stop != StopReason::Completed;
        if drained {
            warn!(?stop, pending = session.pending_count(), "draining deferred fields");
            self.phase = SchedulerPhase::Draining;
            session.disallow_further_deferral();
            round += 1;

            session.replace_result(engine.evaluate(session).await);
            let leftover = session.take_pending();
            if !leftover.is_empty() {
                warn!(count = leftover.len(), "resolving deferred fields the walk did not reach");
            }
            for (path, resolver) in leftover {
                let outcome = resolver().await;
                session.materialize(&path, outcome);
            }
            let result = session.result();
            let resolved = session.take_resolved();
            resolved_paths += resolved.len();
            emitter
                .emit(RoundChunk {
                    round,
                    result,
                    resolved,
                    is_final: true,
                })
                .await?;
        }

        self.phase = SchedulerPhase::Done;
        let report = RoundReport {
            scheduled_rounds,
            drained,
            resolved_paths,
            stop,
            elapsed: start.elapsed(),
        };
        info!(
            rounds = report.scheduled_rounds,
            drained = report.drained,
            resolved = report.resolved_paths,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "deferred response complete"
        );
        Ok(report)
    }
}

/// Result of starting an execution.
#[derive(Debug)]
pub enum ExecutionOutcome<E> {
    /// Nothing was deferred; a single response.
    Complete(Response),
    /// The initial response left fields pending.
    Streaming(DeferredStream<E>),
}

/// An operation executed with deferral enabled.
#[derive(Debug)]
pub struct DeferredExecution<E> {
    engine: E,
    config: DeferConfig,
}

impl<E: ExecutionEngine> DeferredExecution<E> {
    pub fn new(engine: E, config: DeferConfig) -> Self {
        Self { engine, config }
    }

    /// Validates the operation and runs the initial walk.
    ///
    /// Returns [`ExecutionOutcome::Complete`] for validation failures and
    /// for operations that deferred nothing; no stream is started then.
    pub async fn start(self) -> ExecutionOutcome<E> {
        if let Err(errors) = self.engine.validate() {
            debug!(errors = errors.len(), "operation rejected before execution");
            return ExecutionOutcome::Complete(Response::rejected(errors));
        }

        let session = Arc::new(DeferSession::new(self.config));
        let initial = self.engine.evaluate(&session).await;
        if !session.has_pending() {
            debug!("nothing deferred, responding synchronously");
            return ExecutionOutcome::Complete(initial);
        }

        ExecutionOutcome::Streaming(DeferredStream {
            engine: self.engine,
            session,
            initial,
        })
    }
}

/// The pending part of a deferred execution.
#[derive(Debug)]
pub struct DeferredStream<E> {
    engine: E,
    session: Arc<DeferSession>,
    initial: Response,
}

impl<E: ExecutionEngine> DeferredStream<E> {
    /// The initial, partial response.
    pub fn initial(&self) -> &Response {
        &self.initial
    }

    pub fn session(&self) -> &Arc<DeferSession> {
        &self.session
    }

    /// Runs every round, emitting each into `emitter`.
    pub async fn run<S>(self, emitter: &mut S) -> Result<RoundReport, DeferError>
    where
        S: StreamEmitter + ?Sized,
    {
        RoundScheduler::new()
            .run(&self.engine, &self.session, self.initial, emitter)
            .await
    }
}
