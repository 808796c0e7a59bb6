//! Chart resolution: reference parsing, source dispatch, cache policy.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tap::Pipe;
use thiserror::Error;
use url::Url;

use crate::cache::{CacheKey, ChartCache};
use crate::config::{DownloadConfig, DownloadRequest, HttpSource, OciSource, SourceError, SourceKind};
use crate::credentials::{self, Credentials, Resolver, SecretStore};
use crate::fetch::{self, Fetcher};
use crate::metadata::{self, MetadataStore, RepositoryEntry};
use crate::oci::{self, LoadedChart};
use crate::repo_cache::RepoCache;
use crate::urls::join_url;

/// Failure resolving a chart reference, carrying the reference and the
/// failing stage so operators can tell "repository unknown" from "secret
/// missing" from "network unreachable".
#[derive(Error, Debug)]
pub enum Error {
    /// The compound reference does not split into `<repository>/<chart>`.
    #[error("cannot parse chart name {0}")]
    InvalidReference(String),
    /// The request names no source, or several.
    #[error("request {0}: {1}")]
    Source(String, #[source] SourceError),
    /// The HTTP source URL is not `http` or `https`.
    #[error("request {0}: source url {1} does not start with http or https")]
    UnsupportedScheme(String, String),
    /// The metadata store resolved the chart without a download path.
    #[error("chart {0} has no download url")]
    MissingDownloadPath(String),
    /// Metadata lookup failed.
    #[error("metadata error retrieving chart {0}: {1}")]
    Metadata(String, #[source] metadata::Error),
    /// Credential resolution failed.
    #[error("credential error retrieving chart {0}: {1}")]
    Credentials(String, #[source] credentials::Error),
    /// Cache directory failure.
    #[error("cache error retrieving chart {0}: {1}")]
    Cache(String, #[source] crate::cache::Error),
    /// Archive transfer failed.
    #[error("fetch error retrieving chart {0}: {1}")]
    Fetch(String, #[source] fetch::Error),
    /// OCI pull failed.
    #[error("OCI error retrieving chart {0}: {1}")]
    Oci(String, #[source] oci::Error),
    /// The HTTP client could not be constructed.
    #[error("failed to build fetcher: {0}")]
    Fetcher(#[source] fetch::Error),
}

/// Outcome of resolving a request.
#[derive(Debug)]
pub enum Resolved {
    /// The chart archive is cached on disk at this path.
    Archive(PathBuf),
    /// The chart was pulled from an OCI registry into memory.
    Chart(LoadedChart),
}

/// Resolves chart references into locally cached archives.
///
/// One `Downloader` serves a whole controller process; resolutions may
/// run concurrently from multiple tasks.
pub struct Downloader {
    namespace: String,
    metadata: Arc<dyn MetadataStore>,
    credentials: Resolver,
    repo_cache: Arc<RepoCache>,
    cache: ChartCache,
    fetcher: Fetcher,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Downloader {
    /// Build a downloader.
    ///
    /// `namespace` is the system namespace repositories and charts are
    /// registered in. `scopes` are the credential scopes tried in order
    /// when a request carries a secret reference. Must be called within a
    /// Tokio runtime: the repository cache sweep is spawned here and
    /// aborted when the downloader drops.
    pub fn new(
        config: DownloadConfig,
        namespace: impl Into<String>,
        metadata: Arc<dyn MetadataStore>,
        scopes: Vec<Box<dyn SecretStore>>,
    ) -> Result<Self, Error> {
        let fetcher =
            Fetcher::new(config.fetch_timeout, config.accept_invalid_certs).map_err(Error::Fetcher)?;
        let repo_cache = Arc::new(RepoCache::new(config.repo_ttl));
        let sweeper = repo_cache.spawn_sweeper(config.repo_sweep_interval);

        Ok(Self {
            namespace: namespace.into(),
            metadata,
            credentials: Resolver::new(scopes),
            repo_cache,
            cache: ChartCache::new(config.charts_dir),
            fetcher,
            sweeper,
        })
    }

    /// Download the chart named `<repository>/<chart>` at `version` from
    /// its registered repository and return the cached archive path.
    ///
    /// An empty `version` means the latest version the metadata store
    /// resolves.
    pub async fn download_chart(&self, name: &str, version: &str) -> Result<PathBuf, Error> {
        info!("get chart {name} version {version}");
        self.repo_download(name, version, None).await
    }

    /// Resolve a structured request to a local archive or a loaded OCI
    /// chart.
    pub async fn resolve(&self, request: &DownloadRequest) -> Result<Resolved, Error> {
        let kind = request
            .source_kind()
            .map_err(|e| Error::Source(request.name.clone(), e))?;

        match kind {
            SourceKind::Repo(chart) => self
                .repo_download(chart, &request.version, Some(&request.name))
                .await?
                .pipe(Resolved::Archive)
                .pipe(Ok),
            SourceKind::Http(http) => self.http_download(request, http).await.map(Resolved::Archive),
            SourceKind::Oci(oci_source) => self.oci_pull(request, oci_source).await.map(Resolved::Chart),
        }
    }

    /// The shared repository flow. A `request_name` switches the cache
    /// key from the digest form to the request-name form.
    async fn repo_download(
        &self,
        name: &str,
        version: &str,
        request_name: Option<&str>,
    ) -> Result<PathBuf, Error> {
        let (repository, chart_name) = split_reference(name)?;

        let entry = self
            .repository(repository)
            .await
            .map_err(|e| Error::Metadata(name.to_string(), e))?;

        let chart_id = metadata::chart_id(repository, chart_name);
        let resolved = self
            .metadata
            .resolved_chart(&chart_id, version, &self.namespace)
            .await
            .map_err(|e| Error::Metadata(name.to_string(), e))?;

        if resolved.path.is_empty() {
            return Err(Error::MissingDownloadPath(name.to_string()));
        }

        let file_name = file_name_of(&resolved.path);
        let key = match (request_name, &resolved.digest) {
            (Some(request), _) => CacheKey::Named {
                name: request.to_string(),
                file_name,
            },
            (None, Some(digest)) => CacheKey::Digest {
                repository: repository.to_string(),
                digest: digest.clone(),
                file_name,
            },
            (None, None) => CacheKey::Version {
                repository: repository.to_string(),
                chart_name: chart_name.to_string(),
                version: version.to_string(),
            },
        };

        self.cache
            .ensure_dir()
            .map_err(|e| Error::Cache(name.to_string(), e))?;
        if let Some(path) = self.cache.lookup(&key) {
            info!("chart already downloaded, using {}", path.display());
            return Ok(path);
        }

        let url = join_url(&entry.url, &resolved.path);
        let credentials = entry.credentials();
        let dest = self.cache.path_for(&key);
        self.fetcher
            .download(&url, credentials.as_ref(), &dest)
            .await
            .map_err(|e| Error::Fetch(name.to_string(), e))?;

        info!("downloaded chart to {}", dest.display());
        Ok(dest)
    }

    async fn http_download(
        &self,
        request: &DownloadRequest,
        source: &HttpSource,
    ) -> Result<PathBuf, Error> {
        let scheme_ok = Url::parse(&source.url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(Error::UnsupportedScheme(
                request.name.clone(),
                source.url.clone(),
            ));
        }

        let credentials = self
            .request_credentials(source.secret_ref.as_deref(), &request.namespace)
            .await
            .map_err(|e| Error::Credentials(request.name.clone(), e))?;

        self.cache
            .ensure_dir()
            .map_err(|e| Error::Cache(request.name.clone(), e))?;
        let key = CacheKey::Named {
            name: request.name.clone(),
            file_name: file_name_of(&source.url),
        };
        if let Some(path) = self.cache.lookup(&key) {
            info!("chart already downloaded, using {}", path.display());
            return Ok(path);
        }

        let dest = self.cache.path_for(&key);
        self.fetcher
            .download(&source.url, credentials.as_ref(), &dest)
            .await
            .map_err(|e| Error::Fetch(request.name.clone(), e))?;

        info!("downloaded chart from {} to {}", source.url, dest.display());
        Ok(dest)
    }

    async fn oci_pull(
        &self,
        request: &DownloadRequest,
        source: &OciSource,
    ) -> Result<LoadedChart, Error> {
        // Parse before credential resolution so a malformed reference
        // fails without any remote calls.
        let reference = oci::parse_reference(&source.repo)
            .map_err(|e| Error::Oci(request.name.clone(), e))?;

        let credentials = self
            .request_credentials(source.secret_ref.as_deref(), &request.namespace)
            .await
            .map_err(|e| Error::Credentials(request.name.clone(), e))?;

        oci::pull(&reference, credentials.as_ref())
            .await
            .map_err(|e| Error::Oci(request.name.clone(), e))
    }

    /// Repository entry by name: the cache first, then the metadata
    /// store, inserting on success.
    async fn repository(&self, name: &str) -> Result<RepositoryEntry, metadata::Error> {
        if let Some(entry) = self.repo_cache.get(name).await {
            return Ok(entry);
        }

        let entry = self.metadata.repository(name, &self.namespace).await?;
        self.repo_cache.insert(name, entry.clone()).await;
        Ok(entry)
    }

    async fn request_credentials(
        &self,
        secret_ref: Option<&str>,
        namespace: &str,
    ) -> Result<Option<Credentials>, credentials::Error> {
        match secret_ref {
            Some(name) if !name.is_empty() => {
                Ok(Some(self.credentials.resolve(name, namespace).await?))
            }
            _ => Ok(None),
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Split `<repository>/<chart>` into its two parts; both must be
/// non-empty and the chart part must not contain further separators.
fn split_reference(name: &str) -> Result<(&str, &str), Error> {
    match name.split_once('/') {
        Some((repository, chart_name))
            if !repository.is_empty() && !chart_name.is_empty() && !chart_name.contains('/') =>
        {
            Ok((repository, chart_name))
        }
        _ => Err(Error::InvalidReference(name.to_string())),
    }
}

/// Final path segment of a chart path or URL.
fn file_name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
