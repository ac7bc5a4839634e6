//! Broadcast of job state changes for live subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::category::Category;
use crate::job::model::{Job, JobStatus};

/// One observable change to a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    /// Category that triggered the change, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &Job, category: Option<Category>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            category,
            timestamp: job.updated_at,
        }
    }
}

/// Fan-out of [`JobEvent`]s. Slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn publish(&self, job: &Job, category: Option<Category>) {
        self.send(JobEvent::from_job(job, category));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
