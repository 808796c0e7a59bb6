//! OCI registry chart source.
//!
//! Charts stored as OCI artifacts carry the archive as a content layer
//! and, optionally, a provenance layer alongside it. A pull requests
//! both, then loads the archive into an in-memory chart representation
//! by parsing the `Chart.yaml` inside it.

use std::io::Read;

use docker_credential::{CredentialRetrievalError, DockerCredential};
use flate2::read::GzDecoder;
use log::{debug, info};
use oci_client::client::{ClientConfig, ClientProtocol};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::Credentials;

/// Media type of the chart archive layer in an OCI artifact.
pub const CHART_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
/// Media type of the optional provenance layer.
pub const PROVENANCE_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.provenance.v1.prov";

/// Failure pulling or loading an OCI chart.
#[derive(Error, Debug)]
pub enum Error {
    /// The reference string is not a valid OCI reference.
    #[error("invalid OCI reference {0}: {1}")]
    Parse(String, #[source] oci_client::ParseError),
    /// Registry protocol failure: authentication rejected, reference not
    /// found, manifest corrupt.
    #[error("OCI registry error for {0}: {1}")]
    Distribution(
        Box<Reference>,
        #[source] oci_client::errors::OciDistributionError,
    ),
    /// Failed to read locally configured registry credentials.
    #[error("failed to retrieve docker credentials: {0}")]
    CredentialRetrieval(#[from] CredentialRetrievalError),
    /// Locally configured credentials are not a username/password pair.
    #[error("unsupported docker credentials")]
    UnsupportedDockerCredentials,
    /// The artifact carries no chart content layer.
    #[error("{0} is not a helm chart artifact")]
    MissingChartLayer(Box<Reference>),
    /// Reading the pulled archive failed.
    #[error("failed to read chart archive: {0}")]
    Archive(#[source] std::io::Error),
    /// The archive has no `Chart.yaml` at the expected location.
    #[error("chart archive is missing Chart.yaml")]
    MissingChartYaml,
    /// `Chart.yaml` did not parse.
    #[error("invalid chart metadata: {0}")]
    Metadata(#[source] serde_yml::Error),
}

/// Chart metadata parsed from `Chart.yaml`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name.
    pub name: String,
    /// Chart version.
    pub version: String,
    /// Version of the packaged application.
    #[serde(default)]
    pub app_version: Option<String>,
    /// One-line chart description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A chart pulled from an OCI registry, held in memory.
#[derive(Debug)]
pub struct LoadedChart {
    /// The reference the chart was pulled by.
    pub reference: Reference,
    /// Metadata from the archive's `Chart.yaml`.
    pub metadata: ChartMetadata,
    /// The gzipped chart archive.
    pub archive: Vec<u8>,
    /// The provenance layer, when the artifact carries one.
    pub provenance: Option<Vec<u8>>,
}

/// Parse `reference` into an OCI reference.
///
/// Fails on malformed input before any network activity.
pub fn parse_reference(reference: &str) -> Result<Reference, Error> {
    reference
        .parse()
        .map_err(|e| Error::Parse(reference.to_string(), e))
}

/// Pull the chart at `reference` and load it into memory.
///
/// Both the chart content layer and any provenance layer are requested.
/// With no credentials, locally configured registry credentials are used
/// when available, anonymous access otherwise.
pub async fn pull(
    reference: &Reference,
    credentials: Option<&Credentials>,
) -> Result<LoadedChart, Error> {
    let auth = match credentials {
        Some(credentials) => RegistryAuth::Basic(
            credentials.username.clone(),
            credentials.password.clone(),
        ),
        None => ambient_auth(reference)?,
    };

    let client = Client::new(build_client_config());
    debug!("pulling chart {reference}");

    let image = client
        .pull(
            reference,
            &auth,
            vec![CHART_LAYER_MEDIA_TYPE, PROVENANCE_LAYER_MEDIA_TYPE],
        )
        .await
        .map_err(|e| Error::Distribution(Box::new(reference.clone()), e))?;

    let mut archive = None;
    let mut provenance = None;
    for layer in image.layers {
        match layer.media_type.as_str() {
            CHART_LAYER_MEDIA_TYPE => archive = Some(layer.data),
            PROVENANCE_LAYER_MEDIA_TYPE => provenance = Some(layer.data),
            _ => {}
        }
    }
    let archive = archive.ok_or_else(|| Error::MissingChartLayer(Box::new(reference.clone())))?;

    let metadata = load_metadata(&archive)?;
    info!(
        "pulled chart {} {} from {reference}",
        metadata.name, metadata.version
    );

    Ok(LoadedChart {
        reference: reference.clone(),
        metadata,
        archive,
        provenance,
    })
}

/// Find `<chart>/Chart.yaml` in the gzipped archive and parse it.
fn load_metadata(archive: &[u8]) -> Result<ChartMetadata, Error> {
    let gz = GzDecoder::new(archive);
    let mut entries = tar::Archive::new(gz);

    for entry in entries.entries().map_err(Error::Archive)? {
        let mut entry = entry.map_err(Error::Archive)?;
        let path = entry.path().map_err(Error::Archive)?.to_path_buf();

        let mut parts = path.iter();
        let is_chart_yaml = parts.next().is_some()
            && parts.next().is_some_and(|part| part == "Chart.yaml")
            && parts.next().is_none();
        if !is_chart_yaml {
            continue;
        }

        let mut text = String::new();
        entry.read_to_string(&mut text).map_err(Error::Archive)?;
        return serde_yml::from_str(&text).map_err(Error::Metadata);
    }

    Err(Error::MissingChartYaml)
}

fn ambient_auth(reference: &Reference) -> Result<RegistryAuth, Error> {
    let server = reference
        .resolve_registry()
        .strip_suffix('/')
        .unwrap_or_else(|| reference.resolve_registry());

    match docker_credential::get_credential(server) {
        Err(
            CredentialRetrievalError::ConfigNotFound
            | CredentialRetrievalError::NoCredentialConfigured,
        ) => Ok(RegistryAuth::Anonymous),
        Err(err) => Err(err.into()),
        Ok(DockerCredential::UsernamePassword(username, password)) => {
            Ok(RegistryAuth::Basic(username, password))
        }
        Ok(DockerCredential::IdentityToken(_)) => Err(Error::UnsupportedDockerCredentials),
    }
}

fn build_client_config() -> ClientConfig {
    ClientConfig {
        protocol: ClientProtocol::Https,
        ..Default::default()
    }
}
