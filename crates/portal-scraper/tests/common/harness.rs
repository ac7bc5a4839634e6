//! Isolated job manager wired to fake collaborators.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use tempfile::TempDir;
use tokio::sync::broadcast;

use portal_scraper::artifacts::ArtifactStore;
use portal_scraper::job::{Job, JobEvent, JobEventBroadcaster, JobExecutor, JobManager, JobParameters, JobStore};
use portal_scraper::pipeline::{ScraperEngine, StepTimeouts};
use portal_scraper::portal::CategoryExtractor;
use portal_scraper::upload::{RetryPolicy, StorageBackend, UploadClient};

use super::fakes::{succeeding_extractors, FakePortal, VALID_PASSWORD};

pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Parameters for a job selecting every category.
pub fn job_params(username: &str, password: &str) -> JobParameters {
    JobParameters {
        username: username.to_string(),
        password: SecretString::from(password.to_string()),
        academic_year: "2022-23".to_string(),
        scrape_attendance: true,
        scrape_mid_marks: true,
        scrape_personal_details: true,
        upload_to_supabase: true,
    }
}

pub fn valid_params(username: &str) -> JobParameters {
    job_params(username, VALID_PASSWORD)
}

pub struct HarnessBuilder {
    workers: usize,
    portal: Arc<FakePortal>,
    extractors: Vec<Arc<dyn CategoryExtractor>>,
    backend: Option<Arc<dyn StorageBackend>>,
    upload_attempts: u32,
    timeouts: StepTimeouts,
    retain_artifacts: bool,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            workers: 2,
            portal: Arc::new(FakePortal::new()),
            extractors: succeeding_extractors(),
            backend: None,
            upload_attempts: 3,
            timeouts: StepTimeouts {
                login: Duration::from_secs(2),
                category: Duration::from_secs(2),
            },
            retain_artifacts: false,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn portal(mut self, portal: FakePortal) -> Self {
        self.portal = Arc::new(portal);
        self
    }

    pub fn extractors(mut self, extractors: Vec<Arc<dyn CategoryExtractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn upload_attempts(mut self, attempts: u32) -> Self {
        self.upload_attempts = attempts;
        self
    }

    pub fn category_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.category = timeout;
        self
    }

    pub fn retain_artifacts(mut self) -> Self {
        self.retain_artifacts = true;
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let artifact_dir = temp_dir.path().join("artifacts");

        let store = Arc::new(JobStore::new());
        let engine = ScraperEngine::new(self.portal.clone(), self.extractors, self.timeouts);
        let uploader = self.backend.map(|backend| {
            UploadClient::new(backend, RetryPolicy::immediate(self.upload_attempts))
        });
        let executor = JobExecutor::new(
            store,
            JobEventBroadcaster::new(1024),
            Arc::new(engine),
            ArtifactStore::new(&artifact_dir, self.retain_artifacts),
        )
        .with_uploader(uploader);

        TestHarness {
            _temp_dir: temp_dir,
            artifact_dir,
            portal: self.portal,
            manager: JobManager::new(executor, self.workers),
        }
    }
}

pub struct TestHarness {
    _temp_dir: TempDir,
    pub artifact_dir: PathBuf,
    pub portal: Arc<FakePortal>,
    pub manager: JobManager,
}

impl TestHarness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Polls until the job reaches a terminal status.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Arc<Job> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let job = self.manager.status(job_id).expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                job.status,
                WAIT_LIMIT
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until the job is running.
    pub async fn wait_for_running(&self, job_id: &str) -> Arc<Job> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let job = self.manager.status(job_id).expect("job exists");
            if job.status == portal_scraper::JobStatus::Running {
                return job;
            }
            assert!(!job.status.is_terminal(), "job {} finished early", job_id);
            assert!(Instant::now() < deadline, "job {} never started", job_id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Collects every event for `job_id` until its terminal event arrives.
pub async fn collect_events(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: &str,
) -> Vec<JobEvent> {
    let mut events = Vec::new();
    let result = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let event = rx.recv().await.expect("event stream open");
            if event.job_id != job_id {
                continue;
            }
            let terminal = event.status.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "no terminal event for {}", job_id);
    events
}
