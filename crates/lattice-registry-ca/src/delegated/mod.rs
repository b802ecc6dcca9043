//! Registry certificates signed by cert-manager
//!
//! One CA `Issuer` backed by the root secret is applied per control plane.
//! Each workload cluster gets a `Certificate` in the management cluster's
//! namespace, owned by its `LatticeCluster`. Once cert-manager has written
//! the resulting secret, the key pair is pushed to the workload cluster like
//! the in-process path does.
//!
//! Re-issuance on later reconciles is triggered by appending an `Issuing`
//! condition to the Certificate status, which cert-manager treats as a
//! manual renewal request.

pub mod crd;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use lattice_common::crd::ClusterRef;
use lattice_common::kube_utils::{patch_resource_status, wait_for_resource};
use lattice_common::secret_store::secret_field;
use lattice_common::SecretStore;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::config::RegistryCaConfig;
use crate::error::{RegistryCaError, Result};
use crate::leaf::LeafCertificate;
use crate::remote::{RemoteDistributor, SecretKey};
use crate::root::{pem_field, RootCaProvider};
use crate::san::CertificateSpec;
use crate::{FIELD_MANAGER, ROOT_CA_SECRET, TLS_CERT_KEY, TLS_KEY_KEY};

use self::crd::{
    CaIssuer, CertManagerCertificateSpec, Certificate, CertificateCondition,
    CertificatePrivateKey, CertificateStatus, Issuer, IssuerSpec, ObjectReference,
    CONDITION_ISSUING,
};

/// Name of the per-control-plane CA issuer
pub const ISSUER_NAME: &str = "registry-addon-ca-issuer";

/// Suffix of per-cluster Certificate and secret names
pub const CERTIFICATE_SUFFIX: &str = "-registry-addon-tls";

/// Reason recorded on the Issuing condition when we request a renewal
pub const RENEWAL_REASON: &str = "ManuallyTriggered";

/// Access to cert-manager resources in the management cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertManagerClient: Send + Sync {
    /// Create or update an Issuer
    async fn apply_issuer(&self, issuer: &Issuer) -> Result<()>;

    /// Read a Certificate; `None` when absent
    async fn get_certificate(&self, name: &str, namespace: &str) -> Result<Option<Certificate>>;

    /// Create or update a Certificate's spec and metadata
    async fn apply_certificate(&self, certificate: &Certificate) -> Result<()>;

    /// Replace a Certificate's status
    async fn update_certificate_status(&self, certificate: &Certificate) -> Result<()>;
}

/// [`CertManagerClient`] backed by the Kubernetes API
pub struct KubeCertManagerClient {
    client: Client,
}

impl KubeCertManagerClient {
    /// Create a client for the management cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn coordinates(meta: &ObjectMeta, kind: &str) -> Result<(String, String)> {
    match (&meta.name, &meta.namespace) {
        (Some(name), Some(namespace)) => Ok((name.clone(), namespace.clone())),
        _ => Err(RegistryCaError::parse(kind, "object has no name or namespace")),
    }
}

#[async_trait]
impl CertManagerClient for KubeCertManagerClient {
    async fn apply_issuer(&self, issuer: &Issuer) -> Result<()> {
        let (name, namespace) = coordinates(&issuer.metadata, "Issuer")?;
        let api: Api<Issuer> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(issuer),
        )
        .await
        .map_err(|e| {
            RegistryCaError::store("apply", format!("Issuer {namespace}/{name}"), e.into())
        })?;
        Ok(())
    }

    async fn get_certificate(&self, name: &str, namespace: &str) -> Result<Option<Certificate>> {
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(certificate) => Ok(Some(certificate)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(RegistryCaError::store(
                "get",
                format!("Certificate {namespace}/{name}"),
                e.into(),
            )),
        }
    }

    async fn apply_certificate(&self, certificate: &Certificate) -> Result<()> {
        let (name, namespace) = coordinates(&certificate.metadata, "Certificate")?;
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), &namespace);
        let mut body = certificate.clone();
        body.status = None;
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&body),
        )
        .await
        .map_err(|e| {
            RegistryCaError::store("apply", format!("Certificate {namespace}/{name}"), e.into())
        })?;
        Ok(())
    }

    async fn update_certificate_status(&self, certificate: &Certificate) -> Result<()> {
        let (name, namespace) = coordinates(&certificate.metadata, "Certificate")?;
        let status = certificate.status.clone().unwrap_or_default();
        patch_resource_status::<Certificate>(
            &self.client,
            &name,
            &namespace,
            &status,
            FIELD_MANAGER,
        )
        .await
        .map_err(|e| {
            RegistryCaError::store(
                "update status of",
                format!("Certificate {namespace}/{name}"),
                e.into(),
            )
        })
    }
}

/// Name of the Certificate (and its secret) for a cluster
pub fn certificate_name(cluster_name: &str) -> String {
    format!("{}{}", cluster_name, CERTIFICATE_SUFFIX)
}

/// Go-style duration string cert-manager accepts
fn go_duration(duration: std::time::Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Issues registry certificates through cert-manager
pub struct DelegatedIssuer {
    cert_manager: Arc<dyn CertManagerClient>,
    management_secrets: Arc<dyn SecretStore>,
    root: Arc<RootCaProvider>,
    distributor: Arc<RemoteDistributor>,
    config: RegistryCaConfig,
    issuer_applied: OnceCell<()>,
}

impl DelegatedIssuer {
    /// Create a delegated issuer
    pub fn new(
        cert_manager: Arc<dyn CertManagerClient>,
        management_secrets: Arc<dyn SecretStore>,
        root: Arc<RootCaProvider>,
        distributor: Arc<RemoteDistributor>,
        config: RegistryCaConfig,
    ) -> Self {
        Self {
            cert_manager,
            management_secrets,
            root,
            distributor,
            config,
            issuer_applied: OnceCell::new(),
        }
    }

    /// Apply the CA issuer once for the lifetime of this object
    async fn ensure_issuer(&self, namespace: &str) -> Result<()> {
        self.issuer_applied
            .get_or_try_init(|| async {
                let mut issuer = Issuer::new(
                    ISSUER_NAME,
                    IssuerSpec {
                        ca: Some(CaIssuer {
                            secret_name: ROOT_CA_SECRET.to_string(),
                        }),
                    },
                );
                issuer.metadata.namespace = Some(namespace.to_string());
                self.cert_manager.apply_issuer(&issuer).await?;
                info!(namespace = %namespace, issuer = ISSUER_NAME, "applied registry CA issuer");
                Ok::<(), RegistryCaError>(())
            })
            .await
            .map(|_| ())
    }

    fn certificate(&self, cluster: &ClusterRef, namespace: &str, spec: &CertificateSpec) -> Certificate {
        let name = certificate_name(&cluster.name);
        let validity = spec.duration.unwrap_or(self.config.leaf_validity);
        let mut certificate = Certificate::new(
            &name,
            CertManagerCertificateSpec {
                secret_name: name.clone(),
                common_name: Some(spec.common_name.clone()),
                duration: Some(go_duration(validity)),
                dns_names: spec.dns_names.clone(),
                ip_addresses: spec
                    .parsed_ip_addresses()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                usages: vec![
                    "digital signature".to_string(),
                    "key encipherment".to_string(),
                    "server auth".to_string(),
                ],
                issuer_ref: ObjectReference {
                    name: ISSUER_NAME.to_string(),
                    kind: Some("Issuer".to_string()),
                },
                private_key: Some(CertificatePrivateKey {
                    algorithm: "RSA".to_string(),
                    size: 2048,
                    rotation_policy: Some("Always".to_string()),
                }),
            },
        );
        certificate.metadata.namespace = Some(namespace.to_string());
        certificate.metadata.labels = Some(lattice_common::kube_utils::standard_labels(
            crate::APP_NAME,
        ));
        certificate.metadata.owner_references = Some(vec![cluster.owner_reference()]);
        certificate
    }

    /// Ask cert-manager to re-issue an existing Certificate
    async fn trigger_renewal(&self, mut existing: Certificate) -> Result<()> {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| RegistryCaError::signing("renewal timestamp", e))?;
        let status = existing.status.get_or_insert_with(CertificateStatus::default);
        status.conditions.retain(|c| c.type_ != CONDITION_ISSUING);
        status.conditions.push(CertificateCondition {
            type_: CONDITION_ISSUING.to_string(),
            status: "True".to_string(),
            reason: Some(RENEWAL_REASON.to_string()),
            message: Some("Certificate re-issuance manually triggered".to_string()),
            last_transition_time: Some(now),
        });
        self.cert_manager.update_certificate_status(&existing).await
    }

    /// Wait until cert-manager has written a key pair different from `previous`
    async fn wait_for_issued(&self, key: &SecretKey, previous: Option<&[u8]>) -> Result<Secret> {
        let store = self.management_secrets.clone();
        wait_for_resource(
            &format!("cert-manager to issue secret {key}"),
            self.config.poll_timeout,
            self.config.poll_interval,
            || {
                let store = store.clone();
                async move {
                    let secret = store.get(&key.name, &key.namespace).await.map_err(|e| {
                        RegistryCaError::store("get", format!("secret {key}"), e)
                    })?;
                    Ok(secret.filter(|s| {
                        let cert = secret_field(s, TLS_CERT_KEY);
                        let ready = cert.is_some_and(|c| !c.is_empty())
                            && secret_field(s, TLS_KEY_KEY).is_some_and(|k| !k.is_empty());
                        ready && cert != previous
                    }))
                }
            },
        )
        .await
    }

    /// Make the cluster own the cert-manager generated secret
    ///
    /// The reference is not a controller reference: cert-manager may already
    /// hold that slot through its Certificate owner reference.
    async fn adopt_secret(&self, cluster: &ClusterRef, key: &SecretKey, mut secret: Secret) -> Result<()> {
        let mut owner = cluster.owner_reference();
        owner.controller = None;
        let owners = secret.metadata.owner_references.get_or_insert_with(Vec::new);
        if owners.iter().any(|o| o.uid == owner.uid) {
            return Ok(());
        }
        owners.push(owner);
        self.management_secrets
            .update(&secret)
            .await
            .map_err(|e| RegistryCaError::store("update", format!("secret {key}"), e))
    }

    /// Request a certificate for `cluster` from cert-manager and apply it at
    /// `target` inside the cluster
    #[instrument(skip(self, spec), fields(cluster = %cluster, secret = %target))]
    pub async fn issue_and_distribute(
        &self,
        cluster: &ClusterRef,
        target: &SecretKey,
        spec: &CertificateSpec,
    ) -> Result<LeafCertificate> {
        let root = self.root.load_root_ca().await?;
        let namespace = self.root.root_secret_key().await?.namespace;

        self.ensure_issuer(&namespace).await?;

        let key = SecretKey::new(certificate_name(&cluster.name), &namespace);
        let previous = self
            .management_secrets
            .get(&key.name, &key.namespace)
            .await
            .map_err(|e| RegistryCaError::store("get", format!("secret {key}"), e))?
            .and_then(|s| secret_field(&s, TLS_CERT_KEY).map(<[u8]>::to_vec));

        let existing = self
            .cert_manager
            .get_certificate(&key.name, &key.namespace)
            .await?;
        self.cert_manager
            .apply_certificate(&self.certificate(cluster, &namespace, spec))
            .await?;

        let previous = match existing {
            Some(existing) if previous.is_some() => {
                self.trigger_renewal(existing).await?;
                debug!(cluster = %cluster, "requested certificate renewal");
                previous
            }
            _ => None,
        };

        let secret = self.wait_for_issued(&key, previous.as_deref()).await?;
        let leaf = LeafCertificate {
            certificate_pem: pem_field(&secret, &key, TLS_CERT_KEY)?,
            private_key_pem: pem_field(&secret, &key, TLS_KEY_KEY)?,
            ca_certificate_pem: root.certificate_pem,
        };
        self.adopt_secret(cluster, &key, secret).await?;

        self.distributor.distribute(cluster, target, &leaf).await?;
        Ok(leaf)
    }
}
