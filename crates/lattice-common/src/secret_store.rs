//! Secret persistence primitives
//!
//! [`SecretStore`] is the narrow get/create/apply/update surface that PKI
//! code needs from a cluster. [`KubeSecretStore`] backs it with the
//! Kubernetes API; tests substitute an in-memory store.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::Error;

/// Result of an atomic create
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The secret did not exist and was created by this call
    Created,
    /// Another writer created the secret first; nothing was written
    AlreadyExists,
}

/// Named, namespaced secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret; `None` when it does not exist
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret atomically, reporting a conflict instead of overwriting
    async fn create(&self, secret: &Secret) -> Result<CreateOutcome, Error>;

    /// Server-side apply; fields owned by this manager are replaced
    async fn apply(&self, secret: &Secret) -> Result<(), Error>;

    /// Replace an existing secret
    async fn update(&self, secret: &Secret) -> Result<(), Error>;
}

/// Name and namespace of a secret, failing if either is unset
pub fn secret_coordinates(secret: &Secret) -> Result<(String, String), Error> {
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("secret has no name"))?;
    let namespace = secret.namespace().ok_or_else(|| {
        Error::validation(format!("secret {} has no namespace", name))
    })?;
    Ok((name, namespace))
}

/// Raw bytes of one key in a secret's `data`
pub fn secret_field<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.as_slice())
}

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
    field_manager: String,
}

impl KubeSecretStore {
    /// Create a store that applies secrets under the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        match self.api(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, secret: &Secret) -> Result<CreateOutcome, Error> {
        let (name, namespace) = secret_coordinates(secret)?;
        match self
            .api(&namespace)
            .create(&PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(secret = %name, namespace = %namespace, "secret already exists");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, secret: &Secret) -> Result<(), Error> {
        let (name, namespace) = secret_coordinates(secret)?;
        let mut body = secret.clone();
        body.metadata.managed_fields = None;
        body.metadata.resource_version = None;
        let params = PatchParams::apply(&self.field_manager).force();
        self.api(&namespace)
            .patch(&name, &params, &Patch::Apply(&body))
            .await?;
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> Result<(), Error> {
        let (name, namespace) = secret_coordinates(secret)?;
        self.api(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await?;
        Ok(())
    }
}
