//! Object storage used to hand media between stages.
//!
//! Keys are `/`-separated relative paths; everything a job writes lives
//! under `jobs/{job_id}/` (see [`layout`]).

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{DubError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// Download `key` into a local file.
    async fn get_to_file(&self, key: &str, path: &Path) -> Result<()>;
    /// Remove every object under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// Object keys for one job.
pub mod layout {
    use crate::job::JobId;

    pub fn job_prefix(job_id: JobId) -> String {
        format!("jobs/{}", job_id)
    }

    pub fn input(job_id: JobId, file_name: &str) -> String {
        format!("jobs/{}/input/{}", job_id, file_name)
    }

    pub fn segments_prefix(job_id: JobId) -> String {
        format!("jobs/{}/segments", job_id)
    }

    pub fn source_audio(job_id: JobId) -> String {
        format!("jobs/{}/audio/source.wav", job_id)
    }

    pub fn segment_audio(job_id: JobId, segment_index: usize) -> String {
        format!("jobs/{}/segments/{:05}.wav", job_id, segment_index)
    }

    pub fn dubbed_audio(job_id: JobId) -> String {
        format!("jobs/{}/audio/dub.wav", job_id)
    }

    pub fn output_video(job_id: JobId) -> String {
        format!("jobs/{}/output/dubbed.mp4", job_id)
    }

    pub fn subtitles(job_id: JobId, extension: &str) -> String {
        format!("jobs/{}/output/subtitles.{}", job_id, extension)
    }
}

/// Object store backed by a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`. Rejects absolute keys and `..`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(DubError::Validation(format!("invalid object key '{}'", key)));
        }
        Ok(self.root.join(rel))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found(key: &str, e: std::io::Error) -> DubError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DubError::NotFound(format!("object {}", key))
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        debug!("put {} ({} bytes)", key, bytes.len());
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        let size = fs::copy(source, &path)
            .await
            .map_err(|e| Self::not_found(&source.display().to_string(), e))?;
        debug!("put {} from {} ({} bytes)", key, source.display(), size);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| Self::not_found(key, e))
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(dest).await?;
        fs::copy(&path, dest)
            .await
            .map_err(|e| Self::not_found(key, e))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let path = self.path_for(prefix)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path).await?,
            Ok(_) => fs::remove_file(&path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("deleted {}", prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let key = layout::segment_audio(Uuid::nil(), 7);
        assert!(key.ends_with("segments/00007.wav"));

        store.put(&key, b"RIFF".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(matches!(
            store.get("jobs/x/audio/source.wav").await,
            Err(DubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_job() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.put(&layout::source_audio(a), vec![1]).await.unwrap();
        store.put(&layout::source_audio(b), vec![2]).await.unwrap();

        store.delete_prefix(&layout::job_prefix(a)).await.unwrap();
        assert!(matches!(
            store.get(&layout::source_audio(a)).await,
            Err(DubError::NotFound(_))
        ));
        assert_eq!(store.get(&layout::source_audio(b)).await.unwrap(), vec![2]);
        // deleting again is fine
        store.delete_prefix(&layout::job_prefix(a)).await.unwrap();
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let store = LocalObjectStore::new("/tmp/store");
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("/etc/passwd").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("jobs/a/b.wav").is_ok());
    }

    #[tokio::test]
    async fn test_file_transfer() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path().join("store"));
        let src = dir.path().join("in.bin");
        std::fs::write(&src, b"video").unwrap();

        store.put_file("jobs/j/input/in.bin", &src).await.unwrap();
        let dest = dir.path().join("out/copy.bin");
        store.get_to_file("jobs/j/input/in.bin", &dest).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"video");
    }
}
