pub mod events;
pub mod executor;
pub mod id;
pub mod manager;
pub mod model;
pub mod store;

pub use events::{JobEvent, JobEventBroadcaster};
pub use executor::{JobExecutor, StoreProgress};
pub use id::{generate_job_id, is_valid_job_id};
pub use manager::JobManager;
pub use model::{
    summary_message, CategoryResult, Job, JobParameters, JobStatus, UploadState, MSG_ALL_FAILED,
    MSG_ALL_SUCCEEDED, MSG_QUEUED, MSG_RUNNING, MSG_UPLOADING,
};
pub use store::{JobCounts, JobStore};
