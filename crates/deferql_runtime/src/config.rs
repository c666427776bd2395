//! Budgets for deferred execution.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Deferral budgets. A zero disables the corresponding budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeferConfig {
    /// Wall-clock budget for the streaming phase, in milliseconds.
    pub max_execution_ms: u64,
    /// Maximum nesting level of deferred rounds, counting the initial response.
    pub max_nested_rounds: usize,
}

impl DeferConfig {
    /// Creates a config with both budgets disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wall-clock budget in milliseconds.
    pub fn with_max_execution_ms(mut self, millis: u64) -> Self {
        self.max_execution_ms = millis;
        self
    }

    /// Sets the nesting budget.
    pub fn with_max_nested_rounds(mut self, rounds: usize) -> Self {
        self.max_nested_rounds = rounds;
        self
    }

    /// Applies per-request overrides on top of this config.
    pub fn with_overrides(mut self, overrides: &DeferOverrides) -> Self {
        if let Some(millis) = overrides.max_execution_ms {
            self.max_execution_ms = millis;
        }
        if let Some(rounds) = overrides.max_nested_rounds {
            self.max_nested_rounds = rounds;
        }
        self
    }

    /// The time budget, if enabled.
    pub fn time_budget(&self) -> Option<Duration> {
        (self.max_execution_ms > 0).then(|| Duration::from_millis(self.max_execution_ms))
    }

    /// The nesting budget, if enabled.
    pub fn round_budget(&self) -> Option<usize> {
        (self.max_nested_rounds > 0).then_some(self.max_nested_rounds)
    }

    /// Absolute deadline for a stream that starts at `start`.
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.time_budget().map(|budget| start + budget)
    }
}

/// Per-request replacements for [`DeferConfig`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeferOverrides {
    pub max_execution_ms: Option<u64>,
    pub max_nested_rounds: Option<usize>,
}

impl DeferOverrides {
    pub fn is_empty(&self) -> bool {
        self.max_execution_ms.is_none() && self.max_nested_rounds.is_none()
    }
}
