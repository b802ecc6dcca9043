//! Root CA lifecycle
//!
//! The root lives in the secret `registry-addon-root-ca` in the management
//! cluster's namespace. It is created lazily, exactly once, and never
//! modified afterwards. Concurrent first-time callers are serialized by the
//! API server's create semantics: whoever loses the create keeps the
//! winner's root.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use lattice_common::kube_utils::standard_labels;
use lattice_common::secret_store::secret_field;
use lattice_common::{CreateOutcome, SecretStore};
use tracing::{debug, info, instrument, warn};

use crate::config::RegistryCaConfig;
use crate::error::{RegistryCaError, Result};
use crate::keypair::{generate, KeyPairSpec, SigningAuthority};
use crate::remote::{ManagementClusterResolver, SecretKey, TLS_SECRET_TYPE};
use crate::{APP_NAME, CA_CERT_KEY, ROOT_CA_SECRET, TLS_CERT_KEY, TLS_KEY_KEY};

/// Root CA material
#[derive(Clone, PartialEq, Eq)]
pub struct RootCa {
    /// PEM certificate
    pub certificate_pem: String,
    /// PEM private key (PKCS#8 when generated here, PKCS#1 accepted on load)
    pub private_key_pem: String,
}

impl std::fmt::Debug for RootCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCa")
            .field("certificate_pem", &self.certificate_pem)
            .finish_non_exhaustive()
    }
}

impl RootCa {
    /// Generate a new self-signed root
    pub fn generate(config: &RegistryCaConfig) -> Result<Self> {
        let pair = generate(KeyPairSpec {
            common_name: &config.root_common_name,
            dns_names: &[],
            ip_addresses: &[],
            validity: config.root_validity,
            is_ca: true,
            issuer: None,
        })?;
        Ok(Self {
            certificate_pem: pair.certificate_pem,
            private_key_pem: pair.private_key_pem,
        })
    }

    /// Secret layout: `tls.crt`, `tls.key`, and `ca.crt` duplicating `tls.crt`
    pub fn to_secret(&self, key: &SecretKey) -> Secret {
        let cert = ByteString(self.certificate_pem.as_bytes().to_vec());
        Secret {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                labels: Some(standard_labels(APP_NAME)),
                ..Default::default()
            },
            type_: Some(TLS_SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), cert.clone()),
                (CA_CERT_KEY.to_string(), cert),
                (
                    TLS_KEY_KEY.to_string(),
                    ByteString(self.private_key_pem.as_bytes().to_vec()),
                ),
            ])),
            ..Default::default()
        }
    }

    /// Read root material out of its secret
    pub fn from_secret(secret: &Secret, key: &SecretKey) -> Result<Self> {
        Ok(Self {
            certificate_pem: pem_field(secret, key, TLS_CERT_KEY)?,
            private_key_pem: pem_field(secret, key, TLS_KEY_KEY)?,
        })
    }

    /// Parse the root for signing
    pub fn signing_authority(&self) -> Result<SigningAuthority> {
        SigningAuthority::from_pem(&self.certificate_pem, &self.private_key_pem)
    }
}

/// Read a required text field from a secret
pub(crate) fn pem_field(secret: &Secret, key: &SecretKey, field: &str) -> Result<String> {
    let raw = secret_field(secret, field)
        .ok_or_else(|| RegistryCaError::missing_field(&key.name, &key.namespace, field))?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| RegistryCaError::decode(format!("{field} of secret {key}"), e))
}

/// What [`RootCaProvider::ensure_root_ca`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// This call created the root
    Created,
    /// The root was already present; nothing was written
    AlreadyExisted,
    /// Another caller created the root between our read and our create
    Conflict,
}

/// Owns the root CA secret
pub struct RootCaProvider {
    store: Arc<dyn SecretStore>,
    resolver: Arc<dyn ManagementClusterResolver>,
    config: RegistryCaConfig,
}

impl RootCaProvider {
    /// Create a provider over the management cluster's secret store
    pub fn new(
        store: Arc<dyn SecretStore>,
        resolver: Arc<dyn ManagementClusterResolver>,
        config: RegistryCaConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Location of the root secret
    pub async fn root_secret_key(&self) -> Result<SecretKey> {
        let management = self
            .resolver
            .management_cluster()
            .await?
            .ok_or(RegistryCaError::ManagementClusterUndesignated)?;
        Ok(SecretKey::new(ROOT_CA_SECRET, management.namespace))
    }

    /// Create the root CA if it does not exist
    ///
    /// An existing root is never touched. Store failures are returned as-is;
    /// the caller's next reconcile retries.
    #[instrument(skip(self))]
    pub async fn ensure_root_ca(&self) -> Result<EnsureOutcome> {
        let key = self.root_secret_key().await?;

        let existing = self
            .store
            .get(&key.name, &key.namespace)
            .await
            .map_err(|e| RegistryCaError::store("get", format!("secret {key}"), e))?;
        if existing.is_some() {
            debug!(secret = %key, "root CA already exists");
            return Ok(EnsureOutcome::AlreadyExisted);
        }

        let root = RootCa::generate(&self.config)?;
        let outcome = self
            .store
            .create(&root.to_secret(&key))
            .await
            .map_err(|e| RegistryCaError::store("create", format!("secret {key}"), e))?;

        match outcome {
            CreateOutcome::Created => {
                info!(secret = %key, "created registry root CA");
                Ok(EnsureOutcome::Created)
            }
            CreateOutcome::AlreadyExists => {
                warn!(secret = %key, "root CA created concurrently, keeping existing");
                Ok(EnsureOutcome::Conflict)
            }
        }
    }

    /// Load the root CA; a missing root is [`RegistryCaError::SecretNotFound`]
    pub async fn load_root_ca(&self) -> Result<RootCa> {
        let key = self.root_secret_key().await?;
        let secret = self
            .store
            .get(&key.name, &key.namespace)
            .await
            .map_err(|e| RegistryCaError::store("get", format!("secret {key}"), e))?
            .ok_or_else(|| RegistryCaError::secret_not_found(&key.name, &key.namespace))?;
        RootCa::from_secret(&secret, &key)
    }
}
