//! Persistent disk cache for deterministic generation results.
//!
//! Speech and image providers are pure functions of their payload, so the
//! pipeline can answer a repeated request from disk without spending a
//! provider call. Entries are keyed by a digest over the capability and a
//! payload fingerprint; the cache is size-capped with oldest-first
//! eviction.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::artifact::MediaKind;
use crate::providers::Capability;

/// Disk cache for generated media, one file per entry.
pub struct MediaCache {
    cache_dir: PathBuf,
    max_size_mb: u64,
}

impl MediaCache {
    /// Create a cache over `cache_dir`, capped at `max_size_mb`.
    /// The directory is created lazily on first store.
    pub fn new(cache_dir: PathBuf, max_size_mb: u64) -> Self {
        Self {
            cache_dir,
            max_size_mb,
        }
    }

    /// Deterministic entry key for a capability + payload fingerprint.
    /// 32 hex chars; the same request always maps to the same key.
    pub fn entry_key(capability: Capability, fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(capability.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(fingerprint.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }

    fn entry_path(&self, capability: Capability, fingerprint: &str, kind: MediaKind) -> PathBuf {
        let key = Self::entry_key(capability, fingerprint);
        self.cache_dir.join(format!("{}.{}", key, kind.extension()))
    }

    /// Look up a cached result, if present.
    pub fn get(
        &self,
        capability: Capability,
        fingerprint: &str,
        kind: MediaKind,
    ) -> Option<PathBuf> {
        let path = self.entry_path(capability, fingerprint, kind);
        if path.exists() {
            log::debug!("cache hit for {} ({:?})", capability, path);
            Some(path)
        } else {
            None
        }
    }

    /// Copy a generated file into the cache and evict if over the cap.
    pub fn store(
        &self,
        capability: Capability,
        fingerprint: &str,
        kind: MediaKind,
        source: &Path,
    ) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let dest = self.entry_path(capability, fingerprint, kind);
        std::fs::copy(source, &dest)?;
        self.cleanup_if_needed()?;
        Ok(dest)
    }

    /// Total size of all cache entries in bytes.
    pub fn total_size_bytes(&self) -> Result<u64, std::io::Error> {
        let mut total = 0u64;
        if !self.cache_dir.exists() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }

    /// Delete oldest entries (by modification time) until under the cap.
    fn cleanup_if_needed(&self) -> Result<(), std::io::Error> {
        let max_size_bytes = self.max_size_mb * 1024 * 1024;

        let mut files: Vec<(PathBuf, std::fs::Metadata)> = Vec::new();
        let mut total_size = 0u64;

        if !self.cache_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total_size += metadata.len();
                    files.push((entry.path(), metadata));
                }
            }
        }

        if total_size <= max_size_bytes {
            return Ok(());
        }

        files.sort_by_key(|(_, metadata)| {
            metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        for (path, metadata) in files {
            if total_size <= max_size_bytes {
                break;
            }
            let file_size = metadata.len();
            if std::fs::remove_file(&path).is_ok() {
                log::debug!("evicted cache entry {:?}", path);
                total_size = total_size.saturating_sub(file_size);
            }
        }

        Ok(())
    }
}
