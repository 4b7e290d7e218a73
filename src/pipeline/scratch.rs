//! Temp-file lifecycle management for pipeline runs.
//!
//! Every run gets its own scratch directory named by an opaque id, so
//! concurrent requests never collide on a path. Intermediate files live in
//! scratch and are removed when the run ends, on every exit path; removal
//! is best-effort and idempotent, and never shadows the run's real result.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Process-local tie-breaker for run ids minted within the same nanosecond.
static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint an opaque run id from the payload digest and the clock.
///
/// 32 hex chars; the same payload never produces the same id twice within
/// one process.
pub fn run_id(seed: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    hasher.update(nanos.to_le_bytes());
    hasher.update(RUN_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// A per-run scratch directory, removed recursively when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Create `<parent>/<id>` and return a handle owning it.
    pub fn create(parent: &Path, id: &str) -> Result<Self, std::io::Error> {
        let root = parent.join(id);
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// A file path inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Remove the directory and everything in it.
    ///
    /// Idempotent; a directory that is already gone counts as removed.
    /// Failures are logged and swallowed so cleanup never masks the run's
    /// primary result.
    pub fn cleanup(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => log::debug!("removed scratch dir {:?}", self.root),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove scratch dir {:?}: {}", self.root, e),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Guard over one intermediate file, deleting it when dropped.
///
/// `release` transfers ownership out of the guard for files that turn out
/// to be the final artifact.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
    removed: bool,
}

impl TempArtifact {
    /// Track an existing (or about-to-exist) file.
    pub fn track(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file now.
    ///
    /// Idempotent: deleting twice, or deleting a file that never existed,
    /// is success. Failures are logged, never escalated.
    pub fn remove(&mut self) {
        if self.released || self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed intermediate {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove intermediate {:?}: {}", self.path, e),
        }
    }

    /// Stop tracking: the file survives and the caller owns it now.
    pub fn release(mut self) -> PathBuf {
        self.released = true;
        self.path.clone()
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Produce an intermediate with `factory`, use it with `body`, and delete
/// it no matter how `body` leaves the scope.
pub async fn with_scoped_artifact<P, B, Fut, T>(path: PathBuf, factory: P, body: B) -> T
where
    P: FnOnce(&Path) -> std::io::Result<()>,
    B: FnOnce(PathBuf) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let mut guard = TempArtifact::track(path.clone());
    if let Err(e) = factory(&path) {
        log::warn!("scoped artifact factory failed for {:?}: {}", path, e);
    }
    let out = body(path).await;
    guard.remove();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_opaque() {
        let a = run_id(b"same payload");
        let b = run_id(b"same payload");
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_scratch_dir_created_and_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path;
        {
            let scratch = ScratchDir::create(parent.path(), "run-1").unwrap();
            path = scratch.path().to_path_buf();
            assert!(path.is_dir());
            std::fs::write(scratch.file("a.mp4"), b"partial").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_cleanup_is_idempotent() {
        let parent = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::create(parent.path(), "run-2").unwrap();
        scratch.cleanup();
        scratch.cleanup();
        assert!(!parent.path().join("run-2").exists());
    }

    #[test]
    fn test_temp_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid.mp4");
        std::fs::write(&path, b"bytes").unwrap();
        {
            let _guard = TempArtifact::track(path.clone());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_artifact_double_remove_never_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid.mp4");
        std::fs::write(&path, b"bytes").unwrap();

        let mut guard = TempArtifact::track(path.clone());
        guard.remove();
        guard.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_artifact_missing_file_counts_as_removed() {
        let mut guard = TempArtifact::track(PathBuf::from("/nonexistent/mid.mp4"));
        guard.remove();
    }

    #[test]
    fn test_released_artifact_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.mp4");
        std::fs::write(&path, b"bytes").unwrap();

        let guard = TempArtifact::track(path.clone());
        let kept = guard.release();
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_with_scoped_artifact_cleans_up_after_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scoped.mp4");

        let seen = with_scoped_artifact(
            path.clone(),
            |p| std::fs::write(p, b"intermediate"),
            |p| async move { p.exists() },
        )
        .await;

        assert!(seen);
        assert!(!path.exists());
    }
}
