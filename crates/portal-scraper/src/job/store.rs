//! In-memory job store with atomic snapshot updates and optional on-disk
//! snapshots.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;

use crate::error::{ErrorDetail, ErrorKind, StoreError};
use crate::job::model::{Job, JobStatus};

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Single source of truth for job state.
///
/// Every record is held as an `Arc<Job>`. Updates clone the current record,
/// apply the mutation to the clone and swap it in under the write lock, so a
/// reader holding a snapshot never sees a half-applied change.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    snapshot_dir: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl JobStore {
    /// Creates a memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store that mirrors every record into `dir` and restores the
    /// records already there.
    ///
    /// Restored jobs that had not finished are marked failed: their
    /// credentials were never written to disk, so they cannot be resumed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Snapshot {
            path: dir.clone(),
            source: e,
        })?;

        let store = Self {
            jobs: RwLock::new(HashMap::new()),
            snapshot_dir: Some(dir.clone()),
            persist_lock: Mutex::new(()),
        };

        let restored = store.load_snapshots(&dir)?;
        if restored > 0 {
            log::info!("Restored {} job snapshots from {}", restored, dir.display());
        }
        Ok(store)
    }

    fn load_snapshots(&self, dir: &Path) -> Result<usize, StoreError> {
        let entries = fs::read_dir(dir).map_err(|e| StoreError::Snapshot {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut restored = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_snapshot(&path) {
                Ok(job) => restored.push(recover_interrupted(job)),
                Err(e) => log::warn!("Skipping unreadable job snapshot: {}", e),
            }
        }

        let count = restored.len();
        let mut interrupted = Vec::new();
        {
            let mut jobs = self.write_jobs();
            for (job, was_interrupted) in restored {
                if was_interrupted {
                    interrupted.push(job.id.clone());
                }
                jobs.insert(job.id.clone(), Arc::new(job));
            }
        }

        for id in interrupted {
            log::warn!("Job {} was interrupted by a restart and is marked failed", id);
            self.persist(&id);
        }

        Ok(count)
    }

    /// Inserts a new record. Ids are never reused.
    pub fn create(&self, job: Job) -> Result<Arc<Job>, StoreError> {
        let id = job.id.clone();
        let job = Arc::new(job);
        {
            let mut jobs = self.write_jobs();
            if jobs.contains_key(&id) {
                return Err(StoreError::DuplicateId(id));
            }
            jobs.insert(id.clone(), Arc::clone(&job));
        }
        self.persist(&id);
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Job>, StoreError> {
        self.read_jobs()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_jobs().contains_key(id)
    }

    /// Applies `mutator` to a copy of the record and publishes the copy.
    ///
    /// The id and parameters cannot be changed. Progress is clamped to
    /// [0, 1] and never lowered. A status change that would move backwards or
    /// leave a terminal state is rejected and the stored record is untouched.
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<Arc<Job>, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let updated = {
            let mut jobs = self.write_jobs();
            let current = jobs
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let mut next = Job::clone(current);
            mutator(&mut next);
            reconcile(current, &mut next)?;

            let next = Arc::new(next);
            jobs.insert(id.to_string(), Arc::clone(&next));
            next
        };

        self.persist(id);
        Ok(updated)
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.read_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.read_jobs().values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Job>>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Job>>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Writes the latest snapshot of `id` to disk.
    ///
    /// The record is re-read under the persist lock so concurrent writers can
    /// never leave an older snapshot on disk.
    fn persist(&self, id: &str) {
        let Some(dir) = self.snapshot_dir.as_deref() else {
            return;
        };

        let _guard = match self.persist_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Ok(job) = self.get(id) else {
            return;
        };

        if let Err(e) = write_snapshot(dir, &job) {
            log::warn!("Failed to persist job {}: {}", id, e);
        }
    }
}

fn reconcile(current: &Job, next: &mut Job) -> Result<(), StoreError> {
    if !current.status.can_transition_to(next.status) {
        return Err(StoreError::InvalidTransition {
            id: current.id.clone(),
            from: current.status,
            to: next.status,
        });
    }

    next.id.clone_from(&current.id);
    next.parameters = Arc::clone(&current.parameters);
    next.created_at = current.created_at;

    next.progress = if next.progress.is_nan() {
        current.progress
    } else {
        next.progress.clamp(0.0, 1.0).max(current.progress)
    };

    let now = Utc::now();
    next.updated_at = now;
    if next.status != current.status {
        if next.status == JobStatus::Running && next.started_at.is_none() {
            next.started_at = Some(now);
        }
        if next.status.is_terminal() {
            next.finished_at = Some(now);
        }
    }

    Ok(())
}

/// Fails a restored job that never reached a terminal state. Returns whether
/// the record was changed.
fn recover_interrupted(mut job: Job) -> (Job, bool) {
    if job.status.is_terminal() {
        return (job, false);
    }
    let now = Utc::now();
    job.fail(
        ErrorDetail::new(
            ErrorKind::Interrupted,
            "Job was interrupted by a service restart",
        ),
        "Job interrupted before completion",
    );
    job.updated_at = now;
    job.finished_at = Some(now);
    (job, true)
}

fn read_snapshot(path: &Path) -> Result<Job, StoreError> {
    let content = fs::read_to_string(path).map_err(|e| StoreError::Snapshot {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| StoreError::SnapshotFormat {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_snapshot(dir: &Path, job: &Job) -> Result<(), StoreError> {
    let path = dir.join(format!("{}.json", job.id));
    let tmp = dir.join(format!("{}.json.tmp", job.id));

    let bytes = serde_json::to_vec_pretty(job).map_err(|e| StoreError::SnapshotFormat {
        path: path.clone(),
        source: e,
    })?;
    fs::write(&tmp, bytes).map_err(|e| StoreError::Snapshot {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, &path).map_err(|e| StoreError::Snapshot { path, source: e })
}
