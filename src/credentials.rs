//! Credential resolution across cluster scopes.
//!
//! Chart source credentials may live either in the namespace a request was
//! created in, or in a central namespace only the controller itself can
//! read. Each such location is a scope; scopes are tried in order and the
//! first one holding the secret wins. "Not found" falls through to the
//! next scope, any other failure surfaces immediately.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use log::debug;
use thiserror::Error;

use crate::BoxError;

/// Raw key/value payload of a secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Failure resolving a secret reference to a credential pair.
#[derive(Error, Debug)]
pub enum Error {
    /// The secret was absent from every scope.
    #[error("secret {namespace}/{name} not found in any credential scope")]
    NotFound {
        /// Secret name.
        name: String,
        /// Namespace the secret was looked up in.
        namespace: String,
    },
    /// The secret exists but lacks a usable username or password field.
    #[error("can not find username or password in the secret {namespace}/{name}")]
    Incomplete {
        /// Secret name.
        name: String,
        /// Namespace the secret was looked up in.
        namespace: String,
    },
    /// A scope failed with something other than not-found.
    #[error("reading secret {namespace}/{name}: {source}")]
    Scope {
        /// Secret name.
        name: String,
        /// Namespace the secret was looked up in.
        namespace: String,
        /// The underlying store failure.
        #[source]
        source: BoxError,
    },
}

/// A username/password pair for basic authentication.
///
/// Always carries both fields; a source that yields only one of the two
/// is a configuration error, never a partial credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password or token.
    pub password: String,
}

/// One location secrets can be read from.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The payload of the named secret, or `None` when it does not exist
    /// in this scope.
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<SecretData>, BoxError>;
}

/// Reads secrets through a Kubernetes API client.
///
/// Construct one per credential scope: typically one from the caller's
/// configured cluster context and one from the controller's own
/// in-cluster identity.
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    /// Wrap an existing client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient cluster configuration.
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self {
            client: kube::Client::try_default().await?,
        })
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<SecretData>, BoxError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => {
                let data = secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key, value.0))
                    .collect();
                Ok(Some(data))
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }
}

/// Resolves secret references against an ordered list of scopes.
pub struct Resolver {
    scopes: Vec<Box<dyn SecretStore>>,
}

impl Resolver {
    /// A resolver trying `scopes` in order.
    pub fn new(scopes: Vec<Box<dyn SecretStore>>) -> Self {
        Self { scopes }
    }

    /// Look up the named secret and extract its credential pair.
    pub async fn resolve(&self, name: &str, namespace: &str) -> Result<Credentials, Error> {
        for scope in &self.scopes {
            match scope.get(name, namespace).await {
                Ok(Some(data)) => return extract_pair(&data, name, namespace),
                Ok(None) => {
                    debug!("secret {namespace}/{name} not in scope, trying next");
                }
                Err(source) => {
                    return Err(Error::Scope {
                        name: name.to_string(),
                        namespace: namespace.to_string(),
                        source,
                    });
                }
            }
        }

        Err(Error::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

fn extract_pair(data: &SecretData, name: &str, namespace: &str) -> Result<Credentials, Error> {
    let field = |key: &str| {
        data.get(key)
            .map(|raw| {
                String::from_utf8_lossy(raw)
                    .trim_end_matches('\n')
                    .to_string()
            })
            .unwrap_or_default()
    };

    let username = field("username");
    let password = field("password");

    if username.is_empty() || password.is_empty() {
        return Err(Error::Incomplete {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
    }

    Ok(Credentials { username, password })
}
