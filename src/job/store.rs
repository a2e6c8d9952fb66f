//! Job/segment arena.
//!
//! Each job owns its segments; the arena entry is the unit of deletion.
//! Locks are per job, so stages running for different jobs never contend
//! on the same record.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DubError, Result};

use super::{Job, JobId, Segment, SegmentId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    /// Keyed by `segment_index`.
    pub segments: BTreeMap<usize, Segment>,
}

#[derive(Default)]
pub struct JobStore {
    records: RwLock<HashMap<JobId, Arc<Mutex<JobRecord>>>>,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writes so an older state never lands last.
    snapshot_lock: tokio::sync::Mutex<()>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that writes a JSON snapshot on every [`JobStore::persist`].
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Open a snapshot written by a previous run, or start empty if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = if path.exists() {
            Self::load_snapshot(&path)?
        } else {
            Self::new()
        };
        store.snapshot_path = Some(path);
        Ok(store)
    }

    fn record(&self, job_id: JobId) -> Result<Arc<Mutex<JobRecord>>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        records
            .get(&job_id)
            .cloned()
            .ok_or_else(|| DubError::NotFound(format!("job {}", job_id)))
    }

    fn with_record<T>(&self, job_id: JobId, f: impl FnOnce(&mut JobRecord) -> Result<T>) -> Result<T> {
        let record = self.record(job_id)?;
        let mut guard = record.lock().map_err(|_| poisoned())?;
        f(&mut guard)
    }

    pub fn create_job(&self, job: Job) -> Result<JobId> {
        let id = job.id;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&id) {
            return Err(DubError::Validation(format!("job {} already exists", id)));
        }
        records.insert(
            id,
            Arc::new(Mutex::new(JobRecord {
                job,
                segments: BTreeMap::new(),
            })),
        );
        debug!("Created job {}", id);
        Ok(id)
    }

    pub fn job(&self, job_id: JobId) -> Result<Job> {
        self.with_record(job_id, |r| Ok(r.job.clone()))
    }

    /// Mutate a job under its lock.
    pub fn update_job<T>(&self, job_id: JobId, f: impl FnOnce(&mut Job) -> Result<T>) -> Result<T> {
        self.with_record(job_id, |r| {
            let out = f(&mut r.job)?;
            r.job.updated_at = Utc::now();
            Ok(out)
        })
    }

    /// Segments of a job, ordered by `segment_index`.
    pub fn segments_for(&self, job_id: JobId) -> Result<Vec<Segment>> {
        self.with_record(job_id, |r| Ok(r.segments.values().cloned().collect()))
    }

    /// Bulk create-or-replace keyed by `segment_index`.
    ///
    /// Indices must be dense from zero and start times non-decreasing. Any
    /// previously stored index beyond the new set is dropped, so re-running
    /// transcription converges on the same rows instead of appending.
    pub fn upsert_segments(&self, job_id: JobId, segments: Vec<Segment>) -> Result<usize> {
        for (position, seg) in segments.iter().enumerate() {
            if seg.job_id != job_id {
                return Err(DubError::Validation(format!(
                    "segment {} belongs to job {}, not {}",
                    seg.segment_index, seg.job_id, job_id
                )));
            }
            if seg.segment_index != position {
                return Err(DubError::Validation(format!(
                    "segment indices must be dense: expected {}, got {}",
                    position, seg.segment_index
                )));
            }
        }
        if let Some(w) = segments.windows(2).find(|w| w[1].start_ms < w[0].start_ms) {
            return Err(DubError::Validation(format!(
                "segment {} starts at {}ms, before segment {} at {}ms",
                w[1].segment_index, w[1].start_ms, w[0].segment_index, w[0].start_ms
            )));
        }

        let count = segments.len();
        self.with_record(job_id, |r| {
            let stale: Vec<usize> = r.segments.range(count..).map(|(k, _)| *k).collect();
            if !stale.is_empty() {
                warn!("Job {}: dropping {} stale segments", job_id, stale.len());
                for idx in stale {
                    r.segments.remove(&idx);
                }
            }
            for seg in segments {
                r.segments.insert(seg.segment_index, seg);
            }
            Ok(count)
        })
    }

    fn with_segment(&self, id: SegmentId, f: impl FnOnce(&mut Segment)) -> Result<()> {
        self.with_record(id.job_id, |r| {
            let seg = r.segments.get_mut(&id.segment_index).ok_or_else(|| {
                DubError::NotFound(format!("segment {} of job {}", id.segment_index, id.job_id))
            })?;
            f(seg);
            Ok(())
        })
    }

    pub fn update_translation(&self, id: SegmentId, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.with_segment(id, |seg| seg.translated_text = Some(text))
    }

    pub fn update_synthesis(&self, id: SegmentId, audio_ref: impl Into<String>) -> Result<()> {
        let audio_ref = audio_ref.into();
        self.with_segment(id, |seg| seg.synthesized_audio_ref = Some(audio_ref))
    }

    /// Remove a job and all its segments. Used by external cleanup only.
    pub fn delete_job(&self, job_id: JobId) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records
            .remove(&job_id)
            .map(|_| ())
            .ok_or_else(|| DubError::NotFound(format!("job {}", job_id)))
    }

    /// Durably commit the current state if a snapshot path is configured.
    pub async fn persist(&self) -> Result<()> {
        match &self.snapshot_path {
            Some(path) => self.save_snapshot(path).await,
            None => Ok(()),
        }
    }

    /// Write every record to `path` as JSON.
    ///
    /// The records are cloned under their locks; the file itself is written
    /// with `tokio::fs` into a temp file that is renamed over `path`.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let _guard = self.snapshot_lock.lock().await;

        let snapshot = self.snapshot_records()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let (file, tmp_path) = tempfile::NamedTempFile::new_in(&dir)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tmp_path.persist(path).map_err(|e| DubError::Io(e.error))?;

        debug!("Wrote snapshot of {} jobs to {}", snapshot.len(), path.display());
        Ok(())
    }

    fn snapshot_records(&self) -> Result<Vec<JobRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut out = Vec::with_capacity(records.len());
        for record in records.values() {
            out.push(record.lock().map_err(|_| poisoned())?.clone());
        }
        Ok(out)
    }

    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: Vec<JobRecord> = serde_json::from_str(&contents)?;
        let records = snapshot
            .into_iter()
            .map(|r| (r.job.id, Arc::new(Mutex::new(r))))
            .collect::<HashMap<_, _>>();
        info!("Loaded {} jobs from {}", records.len(), path.display());
        Ok(Self {
            records: RwLock::new(records),
            ..Self::default()
        })
    }
}

fn poisoned() -> DubError {
    DubError::Io(std::io::Error::other("job store lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, SubtitleMode};
    use tempfile::TempDir;

    fn store_with_job() -> (JobStore, JobId) {
        let store = JobStore::new();
        let job = Job::new("en", "fr", SubtitleMode::None, "jobs/a/input/v.mp4").unwrap();
        let id = store.create_job(job).unwrap();
        (store, id)
    }

    fn segs(job_id: JobId, texts: &[(u64, u64, &str)]) -> Vec<Segment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, (s, e, t))| Segment::new(job_id, i, *s, *e, *t))
            .collect()
    }

    #[test]
    fn test_segments_ordered_by_index() {
        let (store, id) = store_with_job();
        store
            .upsert_segments(id, segs(id, &[(0, 10, "a"), (10, 20, "b"), (20, 30, "c")]))
            .unwrap();
        let out = store.segments_for(id).unwrap();
        let idx: Vec<usize> = out.iter().map(|s| s.segment_index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (store, id) = store_with_job();
        store.upsert_segments(id, segs(id, &[(0, 10, "a"), (10, 20, "b")])).unwrap();
        store
            .upsert_segments(id, segs(id, &[(0, 12, "a2"), (12, 20, "b2")]))
            .unwrap();
        let out = store.segments_for(id).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].original_text, "a2");
        assert_eq!(out[0].end_ms, 12);
    }

    #[test]
    fn test_upsert_drops_stale_tail() {
        let (store, id) = store_with_job();
        store
            .upsert_segments(id, segs(id, &[(0, 10, "a"), (10, 20, "b"), (20, 30, "c")]))
            .unwrap();
        store.upsert_segments(id, segs(id, &[(0, 15, "x")])).unwrap();
        assert_eq!(store.segments_for(id).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_rejects_sparse_indices() {
        let (store, id) = store_with_job();
        let mut s = segs(id, &[(0, 10, "a"), (10, 20, "b")]);
        s[1].segment_index = 5;
        assert!(matches!(store.upsert_segments(id, s), Err(DubError::Validation(_))));
    }

    #[test]
    fn test_upsert_rejects_unordered_starts() {
        let (store, id) = store_with_job();
        let s = segs(id, &[(500, 600, "a"), (100, 200, "b")]);
        assert!(store.upsert_segments(id, s).is_err());
    }

    #[test]
    fn test_single_field_updates() {
        let (store, id) = store_with_job();
        store.upsert_segments(id, segs(id, &[(0, 10, "a")])).unwrap();
        let sid = SegmentId { job_id: id, segment_index: 0 };

        store.update_translation(sid, "A").unwrap();
        store.update_synthesis(sid, "jobs/a/segments/00000.wav").unwrap();

        let seg = &store.segments_for(id).unwrap()[0];
        assert_eq!(seg.translated_text.as_deref(), Some("A"));
        assert_eq!(seg.synthesized_audio_ref.as_deref(), Some("jobs/a/segments/00000.wav"));
    }

    #[test]
    fn test_update_unknown_segment() {
        let (store, id) = store_with_job();
        let sid = SegmentId { job_id: id, segment_index: 3 };
        assert!(matches!(store.update_translation(sid, "x"), Err(DubError::NotFound(_))));
    }

    #[test]
    fn test_delete_removes_segments() {
        let (store, id) = store_with_job();
        store.upsert_segments(id, segs(id, &[(0, 10, "a")])).unwrap();
        store.delete_job(id).unwrap();
        assert!(store.segments_for(id).is_err());
        assert!(store.job(id).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");

        let store = JobStore::with_snapshot(&path);
        let job = Job::new("en", "de", SubtitleMode::Burn, "in.mp4").unwrap();
        let id = store.create_job(job).unwrap();
        store.upsert_segments(id, segs(id, &[(0, 900, "hello")])).unwrap();
        store
            .update_job(id, |j| j.advance_to(JobStatus::Extracting, 10))
            .unwrap();
        store.persist().await.unwrap();

        let reopened = JobStore::open(&path).unwrap();
        let job = reopened.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Extracting);
        assert_eq!(reopened.segments_for(id).unwrap()[0].original_text, "hello");
    }

    #[test]
    fn test_jobs_are_isolated() {
        let store = JobStore::new();
        let a = store
            .create_job(Job::new("en", "fr", SubtitleMode::None, "a.mp4").unwrap())
            .unwrap();
        let b = store
            .create_job(Job::new("en", "fr", SubtitleMode::None, "b.mp4").unwrap())
            .unwrap();
        store.upsert_segments(a, segs(a, &[(0, 10, "a")])).unwrap();
        assert!(store.segments_for(b).unwrap().is_empty());
    }
}
