//! Plugin artifact download and cache
//!
//! Artifacts are cached under a file name derived from the URL alone, so a
//! rotated checksum still finds the cached file and then rejects it by
//! content. Verified files are made read-only.

use crate::core::crypto::{md5_hex, Checksum};
use crate::core::error::ArtifactError;
use crate::core::fetch::Fetcher;
use crate::plugin::types::PluginArtifact;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

type Result<T> = std::result::Result<T, ArtifactError>;

/// Parsed `<url>[;<unused>;<checksum>]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub url: String,
    pub checksum: Option<Checksum>,
}

impl ArtifactRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(';');
        let url = parts.next().unwrap_or_default().trim().to_string();
        if url.is_empty() {
            return Err(ArtifactError::InvalidRef(raw.to_string()));
        }

        let checksum = match parts.nth(1).map(str::trim).filter(|c| !c.is_empty()) {
            None => None,
            Some(digest) => Some(
                Checksum::parse(digest)
                    .ok_or_else(|| ArtifactError::InvalidRef(format!("unrecognized checksum {}", digest)))?,
            ),
        };

        Ok(Self { url, checksum })
    }
}

/// Downloads, verifies and caches plugin artifacts
pub struct ArtifactManager {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    timeout: Duration,
    /// One async lock per cache path
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    /// (path, checksum) pairs already verified in this process
    verified: Mutex<HashSet<(PathBuf, String)>>,
}

impl ArtifactManager {
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>, timeout: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            timeout,
            locks: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashSet::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache path for an artifact URL
    pub fn local_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!(
            "spider_{}.{}",
            md5_hex(url.trim().as_bytes()),
            std::env::consts::DLL_EXTENSION
        ))
    }

    /// Make the artifact behind `artifact_ref` available on local disk
    ///
    /// A cached file without an expected checksum is trusted as is. A cached
    /// file that fails verification is deleted and downloaded once more; a
    /// download that fails verification is reported as `ChecksumMismatch`.
    pub async fn ensure_local(&self, artifact_ref: &str) -> Result<PluginArtifact> {
        let reference = ArtifactRef::parse(artifact_ref)?;
        let path = self.local_path(&reference.url);

        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let cached = fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);

        let Some(checksum) = reference.checksum.clone() else {
            if cached {
                tracing::debug!(url = %reference.url, path = ?path, "Using cached artifact without checksum");
            } else {
                let bytes = self.download(&reference.url).await?;
                self.store(&path, &bytes).await?;
            }
            return Ok(PluginArtifact {
                source_url: reference.url,
                expected_checksum: None,
                local_path: path,
                verified: false,
            });
        };

        if cached {
            if self.is_verified(&path, &checksum) {
                return Ok(verified_artifact(reference.url, checksum, path));
            }

            let bytes = fs::read(&path).await?;
            if checksum.matches(&bytes) {
                set_readonly(&path, true).await?;
                self.mark_verified(&path, &checksum);
                tracing::debug!(url = %reference.url, path = ?path, "Cached artifact verified");
                return Ok(verified_artifact(reference.url, checksum, path));
            }

            tracing::warn!(
                url = %reference.url,
                expected = %checksum.expected(),
                actual = %checksum.compute(&bytes),
                "Cached artifact checksum mismatch, downloading again"
            );
            remove_cached(&path).await?;
        }

        let bytes = self.download(&reference.url).await?;
        let actual = checksum.compute(&bytes);
        if actual != checksum.expected() {
            tracing::error!(url = %reference.url, expected = %checksum.expected(), actual = %actual, "Artifact checksum mismatch");
            return Err(ArtifactError::ChecksumMismatch {
                expected: checksum.expected().to_string(),
                actual,
            });
        }

        self.store(&path, &bytes).await?;
        self.mark_verified(&path, &checksum);
        Ok(verified_artifact(reference.url, checksum, path))
    }

    /// Delete every cached artifact, returning how many files were removed
    pub async fn clear_cache(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("spider_"));
            if is_artifact {
                remove_cached(&path).await?;
                removed += 1;
            }
        }

        if let Ok(mut verified) = self.verified.lock() {
            verified.clear();
        }
        tracing::info!(removed, dir = ?self.cache_dir, "Cleared artifact cache");
        Ok(removed)
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn is_verified(&self, path: &Path, checksum: &Checksum) -> bool {
        self.verified
            .lock()
            .map(|v| v.contains(&(path.to_path_buf(), checksum.expected().to_string())))
            .unwrap_or(false)
    }

    fn mark_verified(&self, path: &Path, checksum: &Checksum) {
        if let Ok(mut verified) = self.verified.lock() {
            verified.insert((path.to_path_buf(), checksum.expected().to_string()));
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!(url = %url, "Downloading artifact");
        let bytes = self
            .fetcher
            .fetch(url, self.timeout)
            .await
            .map_err(|e| ArtifactError::Network(format!("{}: {}", url, e)))?;
        if bytes.is_empty() {
            return Err(ArtifactError::EmptyBody(url.to_string()));
        }
        tracing::debug!(url = %url, size = bytes.len(), "Artifact downloaded");
        Ok(bytes)
    }

    /// Write through a temporary file so a partial write never sits under the final name
    async fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        set_readonly(path, true).await?;
        tracing::info!(path = ?path, size = bytes.len(), "Artifact cached");
        Ok(())
    }
}

fn verified_artifact(url: String, checksum: Checksum, path: PathBuf) -> PluginArtifact {
    PluginArtifact {
        source_url: url,
        expected_checksum: Some(checksum),
        local_path: path,
        verified: true,
    }
}

async fn set_readonly(path: &Path, readonly: bool) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path).await?.permissions();
    if permissions.readonly() != readonly {
        permissions.set_readonly(readonly);
        fs::set_permissions(path, permissions).await?;
    }
    Ok(())
}

async fn remove_cached(path: &Path) -> std::io::Result<()> {
    set_readonly(path, false).await?;
    fs::remove_file(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetch::tests::MockFetcher;

    const URL: &str = "http://x.com/spider.so";
    const BODY: &[u8] = b"spider module bytes";

    fn manager(dir: &Path, fetcher: &Arc<MockFetcher>) -> ArtifactManager {
        let fetcher: Arc<dyn Fetcher> = fetcher.clone();
        ArtifactManager::new(dir, fetcher, Duration::from_secs(5))
    }

    fn pinned(body: &[u8]) -> String {
        format!("{};md5;{}", URL, md5_hex(body))
    }

    #[test]
    fn test_parse_ref() {
        let r = ArtifactRef::parse(" http://x/a.so ").unwrap();
        assert_eq!(r.url, "http://x/a.so");
        assert!(r.checksum.is_none());

        let r = ArtifactRef::parse("http://x/a.so;md5;D41D8CD98F00B204E9800998ECF8427E").unwrap();
        assert_eq!(r.checksum, Some(Checksum::Md5("d41d8cd98f00b204e9800998ecf8427e".into())));

        assert!(ArtifactRef::parse("http://x/a.so;md5;").unwrap().checksum.is_none());
        assert!(matches!(ArtifactRef::parse(";md5;abc"), Err(ArtifactError::InvalidRef(_))));
        assert!(matches!(ArtifactRef::parse("http://x;md5;xyz"), Err(ArtifactError::InvalidRef(_))));
    }

    #[tokio::test]
    async fn test_download_then_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, BODY));
        let artifacts = manager(dir.path(), &fetcher);

        let artifact = artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        assert!(artifact.verified);
        assert_eq!(std::fs::read(&artifact.local_path).unwrap(), BODY);
        assert!(std::fs::metadata(&artifact.local_path).unwrap().permissions().readonly());

        artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_match_makes_no_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default());
        let artifacts = manager(dir.path(), &fetcher);
        std::fs::write(artifacts.local_path(URL), BODY).unwrap();

        let artifact = artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        assert!(artifact.verified);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_mismatch_downloads_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, BODY));
        let artifacts = manager(dir.path(), &fetcher);
        let path = artifacts.local_path(URL);
        std::fs::write(&path, b"stale build").unwrap();

        let artifact = artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), BODY);
        assert_eq!(artifact.local_path, path);
    }

    #[tokio::test]
    async fn test_redownload_mismatch_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, b"tampered".to_vec()));
        let artifacts = manager(dir.path(), &fetcher);
        let path = artifacts.local_path(URL);
        std::fs::write(&path, b"stale build").unwrap();

        let result = artifacts.ensure_local(&pinned(BODY)).await;
        match result {
            Err(ArtifactError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, md5_hex(BODY));
                assert_eq!(actual, md5_hex(b"tampered"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fetcher.calls(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_checksumless_cache_is_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, BODY));
        let artifacts = manager(dir.path(), &fetcher);
        std::fs::write(artifacts.local_path(URL), b"anything").unwrap();

        let artifact = artifacts.ensure_local(URL).await.unwrap();
        assert!(!artifact.verified);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(std::fs::read(artifact.local_path).unwrap(), b"anything");
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, Vec::new()));
        let artifacts = manager(dir.path(), &fetcher);

        assert!(matches!(artifacts.ensure_local(URL).await, Err(ArtifactError::EmptyBody(_))));
        assert!(matches!(
            artifacts.ensure_local("http://x.com/missing.so").await,
            Err(ArtifactError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, BODY));
        let artifacts = manager(dir.path(), &fetcher);
        let reference = pinned(BODY);

        let (a, b) = tokio::join!(artifacts.ensure_local(&reference), artifacts.ensure_local(&reference));
        assert_eq!(a.unwrap().local_path, b.unwrap().local_path);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::default().with(URL, BODY));
        let artifacts = manager(dir.path(), &fetcher);
        artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(artifacts.clear_cache().await.unwrap(), 1);
        assert!(dir.path().join("unrelated.txt").exists());

        artifacts.ensure_local(&pinned(BODY)).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }
}
