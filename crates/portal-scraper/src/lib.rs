pub mod api;
pub mod artifacts;
pub mod category;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod portal;
pub mod sanitize;
pub mod secrets;
pub mod telemetry;
pub mod upload;
pub mod worker;

pub use api::{
    cancel_job, health, job_status, list_jobs, submit_scrape, ApiError, HealthResponse,
    JobStatusResponse, ScrapeRequest, ScrapeResponse,
};
pub use artifacts::ArtifactStore;
pub use category::{Category, Record, RecordSet};
pub use config::{load_config, load_config_from_str, ServiceConfig};
pub use error::{
    ArtifactError, ConfigError, ErrorDetail, ErrorKind, JobError, Result, ScraperError, StoreError,
    WorkerError,
};
pub use job::{
    CategoryResult, Job, JobEvent, JobEventBroadcaster, JobExecutor, JobManager, JobParameters,
    JobStatus, JobStore, UploadState,
};
pub use pipeline::{PipelineOutcome, PipelineResult, ScraperEngine};
pub use portal::{CategoryExtractor, HttpPortal, PortalConnector, PortalError, PortalSession};
pub use telemetry::{init_logging, LogFormat};
pub use upload::{
    BackendError, ObjectKey, RetryPolicy, StorageBackend, SupabaseStorage, UploadClient,
    UploadOutcome,
};
