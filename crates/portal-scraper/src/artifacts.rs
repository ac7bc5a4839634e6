//! On-disk copies of extracted records, one JSON file per category.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::category::{Category, RecordSet};
use crate::config::ArtifactConfig;
use crate::error::ArtifactError;
use crate::sanitize;

pub struct ArtifactStore {
    root: PathBuf,
    retain_uploaded: bool,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P, retain_uploaded: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            retain_uploaded,
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(&config.directory, config.retain_uploaded)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: &str, category: Category) -> PathBuf {
        self.root
            .join(sanitize::path_segment(job_id))
            .join(format!("{}.json", category.as_str()))
    }

    /// Writes the records for one category to `<root>/<job_id>/<category>.json`.
    ///
    /// The file is written next to its final name and renamed into place, so
    /// a reader never sees a partial artifact.
    pub async fn write(
        &self,
        job_id: &str,
        category: Category,
        records: &RecordSet,
    ) -> Result<PathBuf, ArtifactError> {
        let body = records.to_json_bytes()?;
        let path = self.path_for(job_id, category);

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ArtifactError::CreateDirectory {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| ArtifactError::WriteFile {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ArtifactError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        debug!("Wrote {} record(s) to {}", records.len(), path.display());
        Ok(path)
    }

    /// Drops the artifact for a category that reached durable storage.
    ///
    /// Returns whether the file was removed. Failures are logged, never raised:
    /// a leftover file is harmless.
    pub async fn discard_uploaded(&self, job_id: &str, category: Category) -> bool {
        if self.retain_uploaded {
            return false;
        }
        let path = self.path_for(job_id, category);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed uploaded artifact {}", path.display());
                if let Some(dir) = path.parent() {
                    // Only succeeds once the job directory is empty.
                    let _ = tokio::fs::remove_dir(dir).await;
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove artifact {}: {}", path.display(), e);
                false
            }
        }
    }
}
