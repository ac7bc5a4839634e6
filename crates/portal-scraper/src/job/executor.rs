//! Runs one job end to end: engine, local artifacts, upload, terminal status.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::category::{Category, RecordSet};
use crate::error::{ErrorDetail, ErrorKind, StoreError};
use crate::job::events::JobEventBroadcaster;
use crate::job::model::{
    summary_message, CategoryResult, Job, JobStatus, UploadState, MSG_ALL_FAILED, MSG_RUNNING,
    MSG_UPLOADING,
};
use crate::job::store::JobStore;
use crate::pipeline::{
    PipelineOutcome, PipelineResult, ProgressEvent, ProgressReporter, ScraperEngine,
};
use crate::upload::{UploadClient, UploadOutcome};
use crate::worker::{JobRunner, WorkItem};

/// Mirrors engine progress into the job store and the event stream.
pub struct StoreProgress {
    job_id: String,
    store: Arc<JobStore>,
    events: JobEventBroadcaster,
}

impl StoreProgress {
    pub fn new(job_id: &str, store: Arc<JobStore>, events: JobEventBroadcaster) -> Self {
        Self {
            job_id: job_id.to_string(),
            store,
            events,
        }
    }

    fn apply<F>(&self, category: Option<Category>, mutator: F)
    where
        F: FnOnce(&mut Job),
    {
        let result = self.store.update(&self.job_id, |job| {
            // A job failed by the monitor or a restart keeps its final record.
            if job.status == JobStatus::Running {
                mutator(job);
            }
        });
        match result {
            Ok(job) => self.events.publish(&job, category),
            Err(e) => warn!("Failed to record progress for job {}: {}", self.job_id, e),
        }
    }
}

impl ProgressReporter for StoreProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { message } => self.apply(None, |job| job.message = message),
            ProgressEvent::Authenticated { progress } => self.apply(None, |job| {
                job.message = MSG_RUNNING.to_string();
                job.progress = progress;
            }),
            ProgressEvent::CategoryStarted { category } => self.apply(Some(category), |job| {
                job.message = category.activity_message().to_string();
            }),
            ProgressEvent::CategoryFinished {
                category,
                result,
                progress,
            } => self.apply(Some(category), |job| {
                job.category_results.insert(category, result);
                if let Some(progress) = progress {
                    job.progress = progress;
                }
            }),
        }
    }
}

/// Executes scheduled jobs for the worker pool.
pub struct JobExecutor {
    store: Arc<JobStore>,
    events: JobEventBroadcaster,
    engine: Arc<ScraperEngine>,
    artifacts: ArtifactStore,
    uploader: Option<UploadClient>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<JobStore>,
        events: JobEventBroadcaster,
        engine: Arc<ScraperEngine>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            store,
            events,
            engine,
            artifacts,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Option<UploadClient>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    pub async fn execute(&self, item: WorkItem) {
        let job_id = item.job_id.as_str();

        let job = match self.store.get(job_id) {
            Ok(job) => job,
            Err(e) => {
                warn!("Dropping work item: {}", e);
                return;
            }
        };
        if job.status != JobStatus::Queued {
            debug!("Skipping job {} in status {}", job_id, job.status);
            return;
        }

        // Fails if the job was cancelled after the check above.
        let job = match self.store.update(job_id, |job| {
            job.status = JobStatus::Running;
            job.message = MSG_RUNNING.to_string();
        }) {
            Ok(job) => job,
            Err(e) => {
                debug!("Job {} not started: {}", job_id, e);
                return;
            }
        };
        self.events.publish(&job, None);
        info!("Job {} started", job_id);

        let progress = StoreProgress::new(job_id, Arc::clone(&self.store), self.events.clone());
        let result = self
            .engine
            .run(job_id, &job.parameters, &item.cancel, &progress)
            .await;

        self.finalize(&job, result).await;
    }

    async fn finalize(&self, job: &Job, result: PipelineResult) {
        let PipelineResult {
            outcome,
            records,
            category_results,
            ..
        } = result;

        let finished = match outcome {
            PipelineOutcome::Aborted(error) => {
                self.finish(&job.id, JobStatus::Failed, |job| {
                    job.category_results = category_results;
                    let message = format!("Scraping failed: {}", error.message);
                    job.fail(error, message);
                })
            }
            PipelineOutcome::Cancelled => self.finish(&job.id, JobStatus::Failed, |job| {
                job.category_results = category_results;
                job.fail(
                    ErrorDetail::new(ErrorKind::Cancelled, "Job was cancelled"),
                    "Job cancelled",
                );
            }),
            PipelineOutcome::AllFailed(error) => {
                self.finish(&job.id, JobStatus::Failed, |job| {
                    job.category_results = category_results;
                    job.progress = 1.0;
                    job.fail(error, MSG_ALL_FAILED);
                })
            }
            PipelineOutcome::Extracted => self.complete(job, records, category_results).await,
        };

        match finished {
            Ok(job) => {
                info!("Job {} finished as {}: {}", job.id, job.status, job.message);
                self.events.publish(&job, None);
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!("Job {} was already {} before it finished", job.id, from);
            }
            Err(e) => warn!("Failed to finalize job {}: {}", job.id, e),
        }
    }

    async fn complete(
        &self,
        job: &Job,
        records: BTreeMap<Category, RecordSet>,
        mut results: BTreeMap<Category, CategoryResult>,
    ) -> Result<Arc<Job>, StoreError> {
        for (category, set) in &records {
            match self.artifacts.write(&job.id, *category, set).await {
                Ok(path) => {
                    if let Some(result) = results.get_mut(category) {
                        result.artifact_path = Some(path.display().to_string());
                    }
                }
                Err(e) => warn!("Failed to write {} artifact for job {}: {}", category, job.id, e),
            }
        }

        let params = &job.parameters;
        if params.upload_to_supabase && !records.is_empty() {
            for category in records.keys() {
                if let Some(result) = results.get_mut(category) {
                    result.upload = UploadState::Pending;
                }
            }
            let pending = results.clone();
            let uploading = self.finish(&job.id, JobStatus::Running, |job| {
                job.category_results = pending;
                job.message = MSG_UPLOADING.to_string();
            })?;
            self.events.publish(&uploading, None);

            let outcome = self.upload(job, &records).await;
            for (category, state) in outcome.results {
                if matches!(state, UploadState::Uploaded { .. }) {
                    self.artifacts.discard_uploaded(&job.id, category).await;
                }
                if let Some(result) = results.get_mut(&category) {
                    result.upload = state;
                }
            }
        }

        let total = results.len();
        let succeeded = results.values().filter(|r| r.success).count();
        self.finish(&job.id, JobStatus::Completed, |job| {
            job.category_results = results;
            job.status = JobStatus::Completed;
            job.progress = 1.0;
            job.message = summary_message(succeeded, total);
        })
    }

    /// Applies `mutator` only while the job is still running, so a job failed
    /// by the stalled-job monitor keeps its record.
    fn finish<F>(&self, id: &str, to: JobStatus, mutator: F) -> Result<Arc<Job>, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let mut applied = false;
        let job = self.store.update(id, |job| {
            if job.status == JobStatus::Running {
                mutator(job);
                applied = true;
            }
        })?;
        if applied {
            Ok(job)
        } else {
            Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to,
            })
        }
    }

    async fn upload(&self, job: &Job, records: &BTreeMap<Category, RecordSet>) -> UploadOutcome {
        let params = &job.parameters;
        match &self.uploader {
            Some(uploader) => {
                uploader
                    .upload(&job.id, &params.username, &params.academic_year, records)
                    .await
            }
            None => {
                warn!("Job {} requested an upload but no storage backend is configured", job.id);
                let error = ErrorDetail::new(ErrorKind::Upload, "Storage backend is not configured");
                UploadOutcome {
                    results: records
                        .keys()
                        .map(|category| {
                            (
                                *category,
                                UploadState::Failed {
                                    attempts: 0,
                                    error: error.clone(),
                                },
                            )
                        })
                        .collect(),
                }
            }
        }
    }

    /// Marks a job whose execution panicked as failed.
    pub fn fail_internal(&self, job_id: &str, message: &str) {
        let error = ErrorDetail::new(ErrorKind::Internal, message);
        let result = self.store.update(job_id, |job| {
            if !job.status.is_terminal() {
                job.fail(error, "Job failed unexpectedly");
            }
        });
        match result {
            Ok(job) => self.events.publish(&job, None),
            Err(e) => warn!("Failed to record internal error for job {}: {}", job_id, e),
        }
    }
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn run(&self, item: WorkItem) {
        self.execute(item).await;
    }

    fn panicked(&self, job_id: &str, message: &str) {
        self.fail_internal(job_id, message);
    }
}
