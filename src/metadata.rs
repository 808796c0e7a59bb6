//! External repository metadata store.
//!
//! The store that maps a repository name to its base URL and default
//! credentials, and a chart identifier to its resolved download location,
//! is owned by the host controller; this module only defines the seam it
//! is reached through.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::BoxError;
use crate::credentials::Credentials;

/// Failure looking up repository or chart metadata.
#[derive(Error, Debug)]
pub enum Error {
    /// The named repository is not registered.
    #[error("repository {0} not found")]
    RepositoryNotFound(String),
    /// The chart or the requested version is absent from the repository.
    #[error("chart {0} not found")]
    ChartNotFound(String),
    /// Any other store failure, surfaced verbatim.
    #[error("metadata store error: {0}")]
    Upstream(#[source] BoxError),
}

/// A registered chart repository.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEntry {
    /// Base URL chart download paths are resolved against.
    pub url: String,
    /// Username embedded in the repository registration.
    #[serde(default)]
    pub username: Option<String>,
    /// Password embedded in the repository registration.
    #[serde(default)]
    pub password: Option<String>,
}

impl RepositoryEntry {
    /// The embedded basic-auth pair, when both fields are present and
    /// non-empty. A half-set pair is treated as absent.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}

/// A chart version the metadata store resolved for download.
#[derive(Clone, Debug, Deserialize)]
pub struct ResolvedChart {
    /// Download path, relative to the repository base URL unless it is an
    /// absolute URL.
    pub path: String,
    /// Content digest of the archive, when the store knows it.
    #[serde(default)]
    pub digest: Option<String>,
}

/// Read-only access to the repository metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a registered repository by name.
    async fn repository(&self, name: &str, namespace: &str) -> Result<RepositoryEntry, Error>;

    /// Resolve a chart identifier and version to its download location.
    ///
    /// `chart_id` follows the store's addressing scheme (see [`chart_id`]).
    /// An empty `version` resolves to the latest version the store knows.
    async fn resolved_chart(
        &self,
        chart_id: &str,
        version: &str,
        namespace: &str,
    ) -> Result<ResolvedChart, Error>;
}

/// Canonical chart identifier in the metadata store's addressing scheme:
/// the lower-cased chart name joined to the repository name with a dot.
pub fn chart_id(repository: &str, chart_name: &str) -> String {
    format!("{}.{}", chart_name.to_lowercase(), repository)
}
