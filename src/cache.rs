//! Local chart archive cache.
//!
//! Downloaded archives land in a single flat directory under
//! deterministic names. A file already present at the computed path
//! satisfies a request without a network call; files are never mutated
//! after they are written, so presence is proof of validity.

use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

/// Local disk failure operating on the cache directory.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error naming the path it happened on.
    #[error("cache IO error {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Identity of a cached archive.
///
/// The variants are tried in priority order by callers: the digest form
/// when the metadata store knows the content digest, the request-name
/// form for request-scoped downloads, and the version form when neither
/// a digest nor a source file name is available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
    /// Repository name, content digest, and source file name.
    Digest {
        /// Repository the chart came from.
        repository: String,
        /// Content digest reported by the metadata store.
        digest: String,
        /// File name of the source path or URL.
        file_name: String,
    },
    /// Request name and source file name.
    Named {
        /// Name of the originating request.
        name: String,
        /// File name of the source path or URL.
        file_name: String,
    },
    /// Repository, chart name, and version.
    Version {
        /// Repository the chart came from.
        repository: String,
        /// Chart name.
        chart_name: String,
        /// Requested version.
        version: String,
    },
}

impl CacheKey {
    /// Deterministic file name for this key. Path separators inside any
    /// component are replaced with hyphens so the result stays a single
    /// path segment.
    fn file_name(&self) -> String {
        let name = match self {
            CacheKey::Digest {
                repository,
                digest,
                file_name,
            } => format!("{repository}-{digest}-{file_name}"),
            CacheKey::Named { name, file_name } => format!("{name}-{file_name}"),
            CacheKey::Version {
                repository,
                chart_name,
                version,
            } => format!("{repository}-{chart_name}-{version}.tgz"),
        };
        name.replace('/', "-")
    }
}

/// The archive cache directory.
#[derive(Debug, Clone)]
pub struct ChartCache {
    dir: PathBuf,
}

impl ChartCache {
    /// A cache rooted at `dir`. The directory is not created until
    /// [`ensure_dir`](Self::ensure_dir) runs.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory archives are stored in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic path for `key` under the cache root.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// The cached archive for `key`, when one is already on disk.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.exists().then_some(path)
    }

    /// Create the cache directory, including parents, if absent.
    pub fn ensure_dir(&self) -> Result<(), Error> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| Error::Io(self.dir.clone(), e))?;
            info!("charts dir did not exist, created {}", self.dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn digest_key_path() {
        let cache = ChartCache::new("/tmp/charts");
        let key = CacheKey::Digest {
            repository: "stable".to_string(),
            digest: "abc123".to_string(),
            file_name: "nginx-1.2.3.tgz".to_string(),
        };
        assert_eq!(
            cache.path_for(&key),
            PathBuf::from("/tmp/charts/stable-abc123-nginx-1.2.3.tgz")
        );
    }

    #[test]
    fn named_key_path() {
        let cache = ChartCache::new("/tmp/charts");
        let key = CacheKey::Named {
            name: "myapp".to_string(),
            file_name: "app-2.0.tgz".to_string(),
        };
        assert_eq!(
            cache.path_for(&key),
            PathBuf::from("/tmp/charts/myapp-app-2.0.tgz")
        );
    }

    #[test]
    fn version_key_replaces_separators() {
        let cache = ChartCache::new("/tmp/charts");
        let key = CacheKey::Version {
            repository: "stable".to_string(),
            chart_name: "nginx".to_string(),
            version: "1.2.3/beta".to_string(),
        };
        assert_eq!(
            cache.path_for(&key),
            PathBuf::from("/tmp/charts/stable-nginx-1.2.3-beta.tgz")
        );
    }

    #[test]
    fn lookup_finds_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ChartCache::new(tmp.path());
        let key = CacheKey::Named {
            name: "myapp".to_string(),
            file_name: "app-2.0.tgz".to_string(),
        };

        assert!(cache.lookup(&key).is_none());

        std::fs::write(cache.path_for(&key), b"archive").unwrap();
        assert_eq!(cache.lookup(&key), Some(cache.path_for(&key)));
    }

    #[test]
    fn ensure_dir_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("charts");
        let cache = ChartCache::new(&dir);

        cache.ensure_dir().unwrap();
        assert!(dir.is_dir());

        // second call is a no-op
        cache.ensure_dir().unwrap();
    }
}
