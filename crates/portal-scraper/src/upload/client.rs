use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info_span, warn, Instrument};

use crate::category::{Category, RecordSet};
use crate::error::{ErrorDetail, ErrorKind};
use crate::job::UploadState;
use crate::upload::{ObjectKey, RetryPolicy, StorageBackend};

/// Per-category upload results for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOutcome {
    pub results: BTreeMap<Category, UploadState>,
}

impl UploadOutcome {
    pub fn uploaded(&self) -> usize {
        self.results
            .values()
            .filter(|state| matches!(state, UploadState::Uploaded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .values()
            .filter(|state| matches!(state, UploadState::Failed { .. }))
            .count()
    }
}

/// Lands extracted records in durable storage, retrying transient failures.
pub struct UploadClient {
    backend: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
}

impl UploadClient {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Upserts every category at `<username>/<academic_year>/<category>.json`.
    ///
    /// Categories are uploaded one at a time; a failure in one never stops
    /// the others.
    pub async fn upload(
        &self,
        job_id: &str,
        username: &str,
        academic_year: &str,
        records: &BTreeMap<Category, RecordSet>,
    ) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();
        for (category, set) in records {
            let key = ObjectKey::for_category(username, academic_year, *category);
            let span = info_span!("upload", job_id = %job_id, category = %category);
            let state = self.upload_category(&key, set).instrument(span).await;
            outcome.results.insert(*category, state);
        }
        outcome
    }

    async fn upload_category(&self, key: &ObjectKey, set: &RecordSet) -> UploadState {
        let body = match set.to_json_bytes() {
            Ok(body) => body,
            Err(e) => {
                return UploadState::Failed {
                    attempts: 0,
                    error: ErrorDetail::new(
                        ErrorKind::Upload,
                        format!("records could not be serialized: {}", e),
                    ),
                }
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.backend.upsert(key, &body).await {
                Ok(()) => return UploadState::Uploaded { attempts },
                Err(e) if self.policy.should_retry(attempts, &e) => {
                    let delay = self.policy.delay_for(attempts, rand::random::<f64>());
                    warn!(
                        "Upload of {} failed on attempt {} ({}), retrying in {:?}",
                        key, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        "Upload of {} failed after {} attempt(s): {}",
                        key, attempts, e
                    );
                    return UploadState::Failed {
                        attempts,
                        error: ErrorDetail::new(ErrorKind::Upload, e.to_string()),
                    };
                }
            }
        }
    }
}
