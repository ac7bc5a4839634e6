//! Accepts jobs, schedules them, and answers status queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use regex::Regex;
use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::artifacts::ArtifactStore;
use crate::config::ServiceConfig;
use crate::error::{ErrorDetail, ErrorKind, JobError, ScraperError, StoreError};
use crate::job::events::{JobEvent, JobEventBroadcaster};
use crate::job::executor::JobExecutor;
use crate::job::id::generate_job_id;
use crate::job::model::{Job, JobParameters, JobStatus};
use crate::job::store::{JobCounts, JobStore};
use crate::pipeline::{CancelFlag, ScraperEngine};
use crate::sanitize;
use crate::upload::{RetryPolicy, SupabaseStorage, UploadClient};
use crate::worker::{CredentialQueue, WorkItem, WorkerPool};

static ACADEMIC_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").unwrap());

const MAX_ID_ATTEMPTS: usize = 16;

/// Value API explorers prefill into string fields.
const PLACEHOLDER: &str = "string";

type CancelFlags = Arc<Mutex<HashMap<String, CancelFlag>>>;

/// Front door of the service: validation, scheduling and lookups.
pub struct JobManager {
    store: Arc<JobStore>,
    events: JobEventBroadcaster,
    pool: Arc<WorkerPool>,
    credentials: CredentialQueue,
    cancels: CancelFlags,
    /// Jobs waiting for an earlier job of the same account.
    gated: Mutex<JoinSet<()>>,
    closing: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// Starts `workers` workers on the current tokio runtime.
    pub fn new(executor: JobExecutor, workers: usize) -> Self {
        let store = Arc::clone(executor.store());
        let events = executor.events().clone();
        let pool = Arc::new(WorkerPool::new(workers, Arc::new(executor)));
        Self {
            store,
            events,
            pool,
            credentials: CredentialQueue::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            gated: Mutex::new(JoinSet::new()),
            closing: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    /// Builds the production manager and starts the stalled-job monitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ScraperError> {
        let store = match &config.jobs.snapshot_directory {
            Some(dir) => JobStore::open(dir).map_err(JobError::from)?,
            None => JobStore::new(),
        };
        let engine = ScraperEngine::from_config(&config.portal)?;
        let uploader = SupabaseStorage::from_config(&config.storage)?.map(|backend| {
            UploadClient::new(Arc::new(backend), RetryPolicy::from_config(&config.retry))
        });
        if uploader.is_none() {
            info!("No storage backend configured; uploads will be reported as failed");
        }

        let executor = JobExecutor::new(
            Arc::new(store),
            JobEventBroadcaster::new(config.jobs.event_capacity),
            Arc::new(engine),
            ArtifactStore::from_config(&config.artifacts),
        )
        .with_uploader(uploader);

        let manager = Self::new(executor, config.workers);
        manager.spawn_monitor(config.jobs.monitor_interval(), config.jobs.max_runtime());
        Ok(manager)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validates and queues a job. Returns as soon as the job is recorded.
    pub fn submit(&self, mut params: JobParameters) -> Result<String, JobError> {
        validate(&params)?;
        if self.is_shutdown() {
            return Err(JobError::ShuttingDown);
        }
        params.username = params.username.trim().to_string();
        params.academic_year = params.academic_year.trim().to_string();
        let params = Arc::new(params);

        let mut attempts = 0;
        let job = loop {
            attempts += 1;
            match self.store.create(Job::new(generate_job_id(), Arc::clone(&params))) {
                Ok(job) => break job,
                Err(StoreError::DuplicateId(id)) if attempts < MAX_ID_ATTEMPTS => {
                    debug!("Job id {} already taken, generating another", id);
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(
            "Queued job {} for {} ({} categories)",
            job.id,
            sanitize::redact_username(&params.username),
            params.selected_categories().len()
        );
        self.events.publish(&job, None);

        let cancel = CancelFlag::new();
        self.cancel_flags().insert(job.id.clone(), cancel.clone());

        let turn = self.credentials.enqueue(&params.username);
        let mut item = WorkItem::new(job.id.clone(), cancel).with_turn(turn);
        if item.is_ready() {
            dispatch(&self.pool, &self.store, &self.events, item);
        } else {
            debug!("Job {} waits for an earlier job of the same account", job.id);
            let pool = Arc::clone(&self.pool);
            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            let mut gated = lock(&self.gated);
            while gated.try_join_next().is_some() {}
            gated.spawn(async move {
                item.wait_turn().await;
                dispatch(&pool, &store, &events, item);
            });
        }

        Ok(job.id.clone())
    }

    pub fn status(&self, job_id: &str) -> Result<Arc<Job>, JobError> {
        self.store.get(job_id).map_err(not_found)
    }

    /// Cancels a job. Queued jobs fail at once; running jobs stop at the next
    /// category boundary; finished jobs are returned unchanged.
    pub fn cancel(&self, job_id: &str) -> Result<Arc<Job>, JobError> {
        let job = self.status(job_id)?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        if let Some(flag) = self.cancel_flags().get(job_id) {
            flag.cancel();
        }

        let updated = self
            .store
            .update(job_id, |job| match job.status {
                JobStatus::Queued => job.fail(
                    ErrorDetail::new(ErrorKind::Cancelled, "Job was cancelled before it started"),
                    "Job cancelled",
                ),
                JobStatus::Running => job.message = "Cancellation requested".to_string(),
                JobStatus::Completed | JobStatus::Failed => {}
            })
            .map_err(not_found)?;
        info!("Cancellation requested for job {} ({})", job_id, updated.status);
        self.events.publish(&updated, None);
        Ok(updated)
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Arc<Job>> {
        self.store.list()
    }

    pub fn counts(&self) -> JobCounts {
        self.store.counts()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Fails running jobs that exceeded `max_runtime`. Returns their ids.
    pub fn sweep_stalled(&self, max_runtime: Duration) -> Vec<String> {
        fail_stalled_jobs(&self.store, &self.events, &self.cancels, max_runtime)
    }

    /// Runs [`Self::sweep_stalled`] every `interval` until shutdown.
    pub fn spawn_monitor(&self, interval: Duration, max_runtime: Duration) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let cancels = Arc::clone(&self.cancels);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                fail_stalled_jobs(&store, &events, &cancels, max_runtime);
            }
        });

        let mut monitor = lock(&self.monitor);
        if let Some(previous) = monitor.replace(handle) {
            previous.abort();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.pool.is_shutdown()
    }

    /// Stops accepting jobs and waits for queued and running jobs to finish,
    /// including jobs still waiting behind another job of the same account.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        loop {
            let mut gated = std::mem::take(&mut *lock(&self.gated));
            if gated.is_empty() {
                break;
            }
            debug!("Waiting for {} account-gated jobs to be scheduled", gated.len());
            while let Some(result) = gated.join_next().await {
                if let Err(e) = result {
                    warn!("Account-gated dispatch task failed: {}", e);
                }
            }
        }
        self.pool.shutdown();
        if let Some(monitor) = lock(&self.monitor).take() {
            monitor.abort();
        }
        self.pool.wait().await;
        info!("Job manager stopped");
    }

    fn cancel_flags(&self) -> MutexGuard<'_, HashMap<String, CancelFlag>> {
        let mut flags = lock(&self.cancels);
        // Finished jobs no longer need their flag.
        flags.retain(|id, _| {
            self.store
                .get(id)
                .map(|job| !job.status.is_terminal())
                .unwrap_or(false)
        });
        flags
    }
}

fn validate(params: &JobParameters) -> Result<(), JobError> {
    if params.selected_categories().is_empty() {
        return Err(JobError::Validation(
            "At least one scraping option must be selected".to_string(),
        ));
    }
    if is_blank(&params.username) {
        return Err(JobError::Validation(
            "Username must not be empty or the placeholder \"string\"".to_string(),
        ));
    }
    if is_blank(params.password.expose_secret()) {
        return Err(JobError::Validation(
            "Password must not be empty or the placeholder \"string\"".to_string(),
        ));
    }
    if !ACADEMIC_YEAR.is_match(params.academic_year.trim()) {
        return Err(JobError::Validation(format!(
            "Academic year '{}' must look like 2022-23",
            params.academic_year
        )));
    }
    Ok(())
}

fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == PLACEHOLDER
}

fn not_found(error: StoreError) -> JobError {
    match error {
        StoreError::NotFound(id) => JobError::NotFound(id),
        other => JobError::Store(other),
    }
}

fn dispatch(pool: &WorkerPool, store: &JobStore, events: &JobEventBroadcaster, item: WorkItem) {
    let job_id = item.job_id.clone();
    if let Err(e) = pool.submit(item) {
        warn!("Could not schedule job {}: {}", job_id, e);
        let result = store.update(&job_id, |job| {
            if job.status == JobStatus::Queued {
                job.fail(
                    ErrorDetail::new(ErrorKind::Internal, e.to_string()),
                    "Job could not be scheduled",
                );
            }
        });
        if let Ok(job) = result {
            events.publish(&job, None);
        }
    }
}

fn fail_stalled_jobs(
    store: &JobStore,
    events: &JobEventBroadcaster,
    cancels: &CancelFlags,
    max_runtime: Duration,
) -> Vec<String> {
    let now = Utc::now();
    let mut failed = Vec::new();

    for job in store.list() {
        if job.status != JobStatus::Running {
            continue;
        }
        let Some(runtime) = job.runtime(now).and_then(|r| r.to_std().ok()) else {
            continue;
        };
        if runtime <= max_runtime {
            continue;
        }

        if let Some(flag) = lock(cancels).get(&job.id) {
            flag.cancel();
        }
        let message = format!("Job timed out after {} seconds", max_runtime.as_secs());
        let result = store.update(&job.id, |job| {
            if job.status == JobStatus::Running {
                job.fail(ErrorDetail::new(ErrorKind::Timeout, message.clone()), message);
            }
        });
        match result {
            Ok(updated) if updated.status == JobStatus::Failed => {
                warn!("Job {} exceeded {:?} and was marked failed", job.id, max_runtime);
                events.publish(&updated, None);
                failed.push(job.id.clone());
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to time out job {}: {}", job.id, e),
        }
    }

    failed
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Job manager lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
