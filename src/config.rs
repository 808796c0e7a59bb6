//! Downloader configuration and chart request types.
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration for a [`Downloader`](crate::Downloader).
#[derive(Clone, Debug)]
pub struct DownloadConfig {
    /// Directory downloaded archives are cached in. Created, including
    /// parents, on first use.
    pub charts_dir: PathBuf,
    /// Covers connection and full body transfer of a single fetch.
    pub fetch_timeout: Duration,
    /// Skip TLS certificate validation for chart fetches.
    ///
    /// Off by default; enabling it silently defeats transport security and
    /// must be a conscious operator choice.
    pub accept_invalid_certs: bool,
    /// How long a repository entry stays servable from the metadata cache.
    pub repo_ttl: Duration,
    /// How often expired repository entries are physically removed.
    pub repo_sweep_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            charts_dir: PathBuf::from("/tmp/helm-charts"),
            fetch_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            repo_ttl: Duration::from_secs(5 * 60),
            repo_sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// A request to acquire a chart from one specific source.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Name of the request. Keys the local cache for HTTP and
    /// request-scoped repository downloads.
    pub name: String,
    /// Namespace any secret named by the source is looked up in.
    pub namespace: String,
    /// Compound `<repository>/<chart>` reference.
    #[serde(default)]
    pub chart: Option<String>,
    /// Requested chart version. Empty means latest.
    #[serde(default)]
    pub version: String,
    /// Direct source, bypassing the repository flow.
    #[serde(default)]
    pub source: Option<Source>,
}

/// Direct chart source of a [`DownloadRequest`].
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Chart served as a plain file over HTTP(S).
    #[serde(default)]
    pub http: Option<HttpSource>,
    /// Chart stored as an OCI registry artifact.
    #[serde(default)]
    pub oci: Option<OciSource>,
}

/// A chart served as a plain file over HTTP(S).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    /// Absolute download URL. Must be `http` or `https`.
    pub url: String,
    /// Name of the secret holding basic-auth credentials.
    #[serde(default)]
    pub secret_ref: Option<String>,
}

/// A chart stored as an OCI registry artifact.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OciSource {
    /// Registry reference, `host/repository:tag` or digest form.
    pub repo: String,
    /// Name of the secret holding registry credentials.
    #[serde(default)]
    pub secret_ref: Option<String>,
}

/// Why a request does not name a usable source.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SourceError {
    /// Neither a chart reference nor a direct source is set.
    #[error("no chart source")]
    None,
    /// Several sources are set at once.
    #[error("ambiguous chart source")]
    Ambiguous,
}

/// The single validated source of a request.
#[derive(Debug)]
pub enum SourceKind<'a> {
    /// `<repository>/<chart>` flow through the metadata store.
    Repo(&'a str),
    /// Direct HTTP(S) download.
    Http(&'a HttpSource),
    /// OCI registry pull.
    Oci(&'a OciSource),
}

impl DownloadRequest {
    /// The one populated source of this request.
    ///
    /// Exactly one of the chart reference, the HTTP source, or the OCI
    /// source must be set. Empty strings count as unset.
    pub fn source_kind(&self) -> Result<SourceKind<'_>, SourceError> {
        let mut found = Vec::with_capacity(3);

        if let Some(chart) = self.chart.as_deref().filter(|c| !c.is_empty()) {
            found.push(SourceKind::Repo(chart));
        }
        if let Some(http) = self
            .source
            .as_ref()
            .and_then(|s| s.http.as_ref())
            .filter(|h| !h.url.is_empty())
        {
            found.push(SourceKind::Http(http));
        }
        if let Some(oci) = self
            .source
            .as_ref()
            .and_then(|s| s.oci.as_ref())
            .filter(|o| !o.repo.is_empty())
        {
            found.push(SourceKind::Oci(oci));
        }

        match found.len() {
            0 => Err(SourceError::None),
            1 => Ok(found.swap_remove(0)),
            _ => Err(SourceError::Ambiguous),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn deserialize_http_request() {
        let yaml = r"
name: myapp
namespace: default
source:
  http:
    url: https://files.example.com/pkg/app-2.0.tgz
    secretRef: registry-creds
";
        let request: DownloadRequest = serde_yml::from_str(yaml).unwrap();
        assert_eq!(request.name, "myapp");
        assert_eq!(request.version, "");

        let Ok(SourceKind::Http(http)) = request.source_kind() else {
            panic!("expected http source");
        };
        assert_eq!(http.url, "https://files.example.com/pkg/app-2.0.tgz");
        assert_eq!(http.secret_ref.as_deref(), Some("registry-creds"));
    }

    #[test]
    fn deserialize_chart_request() {
        let yaml = r"
name: nginx
namespace: default
chart: stable/nginx
version: 1.2.3
";
        let request: DownloadRequest = serde_yml::from_str(yaml).unwrap();
        assert!(matches!(
            request.source_kind(),
            Ok(SourceKind::Repo("stable/nginx"))
        ));
    }

    #[test]
    fn empty_request_has_no_source() {
        let request = DownloadRequest {
            name: "empty".to_string(),
            namespace: "default".to_string(),
            chart: None,
            version: String::new(),
            source: None,
        };
        assert_eq!(request.source_kind().unwrap_err(), SourceError::None);
    }

    #[test]
    fn empty_strings_count_as_unset() {
        let request = DownloadRequest {
            name: "empty".to_string(),
            namespace: "default".to_string(),
            chart: Some(String::new()),
            version: String::new(),
            source: Some(Source {
                http: Some(HttpSource {
                    url: String::new(),
                    secret_ref: None,
                }),
                oci: None,
            }),
        };
        assert_eq!(request.source_kind().unwrap_err(), SourceError::None);
    }

    #[test]
    fn two_sources_are_ambiguous() {
        let request = DownloadRequest {
            name: "both".to_string(),
            namespace: "default".to_string(),
            chart: Some("stable/nginx".to_string()),
            version: String::new(),
            source: Some(Source {
                http: None,
                oci: Some(OciSource {
                    repo: "registry.example.com/charts/nginx:1.2.3".to_string(),
                    secret_ref: None,
                }),
            }),
        };
        assert_eq!(request.source_kind().unwrap_err(), SourceError::Ambiguous);
    }
}
