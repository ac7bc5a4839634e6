use std::collections::BTreeMap;

use tracing::debug;

use crate::category::{Category, RecordSet};
use crate::error::{ErrorDetail, ErrorKind};
use crate::job::CategoryResult;

use super::engine::{EngineState, PipelineOutcome, PipelineResult};
use super::progress::step_progress;

/// Accumulates per-category results while the engine runs.
pub struct PipelineContext {
    pub selected: Vec<Category>,
    pub state: EngineState,
    pub records: BTreeMap<Category, RecordSet>,
    pub results: BTreeMap<Category, CategoryResult>,
}

impl PipelineContext {
    pub fn new(selected: Vec<Category>) -> Self {
        Self {
            selected,
            state: EngineState::Authenticating,
            records: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn transition(&mut self, next: EngineState) {
        debug!(from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn total(&self) -> usize {
        self.selected.len()
    }

    pub fn progress(&self) -> f64 {
        step_progress(self.completed(), self.total())
    }

    /// Progress to publish while the job is still running.
    pub fn reportable_progress(&self) -> Option<f64> {
        (self.completed() < self.total()).then(|| self.progress())
    }

    pub fn record_success(&mut self, category: Category, records: RecordSet) -> CategoryResult {
        let result = CategoryResult::succeeded(records.len());
        self.records.insert(category, records);
        self.results.insert(category, result.clone());
        result
    }

    pub fn record_failure(&mut self, category: Category, error: ErrorDetail) -> CategoryResult {
        let result = CategoryResult::failed(error);
        self.results.insert(category, result.clone());
        result
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|r| !r.success)
    }

    /// One error naming every failed category.
    pub fn summary_error(&self) -> ErrorDetail {
        let details: Vec<String> = self
            .results
            .iter()
            .filter_map(|(category, result)| {
                result
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", category, e))
            })
            .collect();
        ErrorDetail::new(
            ErrorKind::ExtractionFailed,
            format!("All scraping tasks failed ({})", details.join("; ")),
        )
    }

    pub fn into_result(self, outcome: PipelineOutcome) -> PipelineResult {
        PipelineResult {
            outcome,
            final_state: self.state,
            records: self.records,
            category_results: self.results,
        }
    }

    /// Ends the run once every selected category has been attempted.
    pub fn finish(mut self) -> PipelineResult {
        if self.all_failed() {
            let error = self.summary_error();
            self.transition(EngineState::Failed);
            self.into_result(PipelineOutcome::AllFailed(error))
        } else {
            self.transition(EngineState::Completed);
            self.into_result(PipelineOutcome::Extracted)
        }
    }

    /// Ends the run before any category was attempted.
    pub fn abort(mut self, error: ErrorDetail) -> PipelineResult {
        self.transition(EngineState::Failed);
        self.into_result(PipelineOutcome::Aborted(error))
    }

    pub fn cancel(mut self) -> PipelineResult {
        self.transition(EngineState::Failed);
        self.into_result(PipelineOutcome::Cancelled)
    }
}
