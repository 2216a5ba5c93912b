// Composite execution strategies and signal generation
pub mod grid;
pub mod oco;
pub mod sma_crossover;
pub mod twap;

use crate::error::ExecutionError;
use crate::models::{Bar, Signal};

pub use grid::{grid_levels, GridBuilder};
pub use oco::{LegOutcome, OcoCoordinator, OcoMode, OcoReport};
pub use sma_crossover::SmaCrossover;
pub use twap::{TwapPlan, TwapScheduler};

/// Stateful per-symbol signal source driven by closed bars
pub trait SignalGenerator: Send + Sync {
    /// Feed one closed bar; returns a signal once enough history exists
    fn on_bar_close(&mut self, symbol: &str, bar: &Bar) -> Option<Signal>;

    fn name(&self) -> &str;

    /// Bars needed before the first signal can be produced
    fn warmup_bars(&self) -> usize;
}

/// Overall outcome of a multi-step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    /// Some steps completed before one failed
    Partial,
    /// Nothing completed
    Failed,
    Cancelled,
}

/// The step that stopped a batch, 1-based
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: usize,
    pub error: ExecutionError,
}

/// Result of a sequential batch (TWAP slices, grid levels)
///
/// Completed steps are always returned, even when a later step failed.
/// Nothing is rolled back.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub completed: Vec<T>,
    pub failure: Option<StepFailure>,
    pub cancelled: bool,
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self {
            completed: Vec::new(),
            failure: None,
            cancelled: false,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match (&self.failure, self.completed.is_empty()) {
            (Some(_), true) => ExecutionStatus::Failed,
            (Some(_), false) => ExecutionStatus::Partial,
            (None, _) if self.cancelled => ExecutionStatus::Cancelled,
            (None, _) => ExecutionStatus::Succeeded,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == ExecutionStatus::Succeeded
    }

    /// True when the batch stopped on a session-ending failure
    pub fn is_fatal(&self) -> bool {
        self.failure
            .as_ref()
            .map(|f| f.error.is_fatal())
            .unwrap_or(false)
    }
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status() {
        let mut report: BatchReport<u32> = BatchReport::new();
        assert_eq!(report.status(), ExecutionStatus::Succeeded);

        report.cancelled = true;
        assert_eq!(report.status(), ExecutionStatus::Cancelled);

        report.cancelled = false;
        report.failure = Some(StepFailure {
            step: 1,
            error: ExecutionError::Rejected("no".into()),
        });
        assert_eq!(report.status(), ExecutionStatus::Failed);
        assert!(!report.is_fatal());

        report.completed.push(1);
        assert_eq!(report.status(), ExecutionStatus::Partial);

        report.failure = Some(StepFailure {
            step: 2,
            error: ExecutionError::Fatal("bad key".into()),
        });
        assert!(report.is_fatal());
    }
}
