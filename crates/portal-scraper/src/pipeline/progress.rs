use crate::category::Category;
use crate::job::CategoryResult;

/// Events emitted by the engine while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        message: String,
    },
    Authenticated {
        progress: f64,
    },
    CategoryStarted {
        category: Category,
    },
    /// `progress` is `None` for the last category: the final unit is only
    /// published together with the terminal status.
    CategoryFinished {
        category: Category,
        result: CategoryResult,
        progress: Option<f64>,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Login counts as the first unit of work, each category as one more.
pub fn step_progress(completed: usize, total: usize) -> f64 {
    (1 + completed) as f64 / (1 + total) as f64
}
