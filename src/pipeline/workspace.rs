use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::Result;
use crate::job::{JobId, JobStatus};

/// Scratch directory owned by one stage execution of one job.
///
/// The directory name carries the job id and stage, plus a random suffix,
/// so concurrent stages never share files. It is removed when dropped,
/// whether the stage succeeded, failed or timed out.
pub struct StageWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl StageWorkspace {
    pub fn create(root: Option<&Path>, job_id: JobId, stage: JobStatus, keep: bool) -> Result<Self> {
        let prefix = format!("autodub-{}-{}-", job_id, stage.stage_name());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!("Workspace for job {} {}: {:?}", job_id, stage, path);

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for StageWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                info!("Keeping workspace {:?}", self.path);
                // Forgetting the guard skips its recursive delete.
                std::mem::forget(dir);
            } else {
                debug!("Cleaning up workspace {:?}", self.path);
            }
        }
    }
}
