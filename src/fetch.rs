//! Chart archive transfer over HTTP(S).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::credentials::Credentials;

/// Failure fetching an archive.
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// Transport-level failure: DNS, connection refused, timeout.
    #[error("failed to fetch {0}: {1}")]
    Request(String, #[source] reqwest::Error),
    /// The server answered with a non-2xx status.
    #[error("failed to fetch {url}: {status}")]
    Status {
        /// The requested URL.
        url: String,
        /// The response status.
        status: StatusCode,
    },
    /// Local disk failure writing the archive.
    #[error("failed to write {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// HTTP(S) archive fetcher with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Build a fetcher. `timeout` covers connection and full body
    /// transfer; certificate validation is skipped only when
    /// `accept_invalid_certs` is set.
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(Error::Client)?;
        Ok(Self { client })
    }

    /// Download `url` to `dest`, attaching basic authentication when
    /// `credentials` is present.
    ///
    /// The whole body is buffered in memory, written to a uniquely named
    /// temp file in the destination directory, and renamed into place. A
    /// failed fetch leaves nothing at `dest`, and a concurrent duplicate
    /// download of the same path cannot expose a partially written file.
    pub async fn download(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<(), Error> {
        debug!("fetching {url}");

        let mut request = self.client.get(url);
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(url.to_string(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Request(url.to_string(), e))?;

        write_archive(dest, &body)
    }
}

fn write_archive(dest: &Path, bytes: &[u8]) -> Result<(), Error> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));

    let mut file =
        NamedTempFile::new_in(dir).map_err(|e| Error::Io(dest.to_path_buf(), e))?;
    file.write_all(bytes)
        .map_err(|e| Error::Io(dest.to_path_buf(), e))?;
    let _file = file
        .persist(dest)
        .map_err(|e| Error::Io(dest.to_path_buf(), e.error))?;

    // temp files are created owner-only; cached archives are shared with
    // whatever renders them
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        _file
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|e| Error::Io(dest.to_path_buf(), e))?;
    }

    Ok(())
}
