//! Chart acquisition and caching.
//!
//! This crate resolves a logical chart reference into a locally cached
//! archive file, fetching it on demand from one of three source types: a
//! named chart repository, a direct HTTP(S) URL, or an OCI registry. It is
//! the acquisition layer of a package deployment controller: the
//! controller decides *when* to install or upgrade a release, this crate
//! decides *how to get the bytes* reliably, cheaply, and without
//! re-downloading unnecessarily.
//!
//! The repository metadata store and the secret store are external
//! collaborators, reached through the [`metadata::MetadataStore`] and
//! [`credentials::SecretStore`] traits. The host controller supplies the
//! implementations; a Kubernetes-backed secret scope
//! ([`credentials::KubeSecretStore`]) is included.
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::use_self)]

pub mod cache;
pub mod config;
pub mod credentials;
mod downloader;
pub mod fetch;
pub mod metadata;
pub mod oci;
pub mod repo_cache;
mod urls;

pub use config::{DownloadConfig, DownloadRequest, HttpSource, OciSource, Source};
pub use downloader::{Downloader, Error, Resolved};
pub use oci::LoadedChart;

/// Opaque failure surfaced by an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
