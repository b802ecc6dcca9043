//! Reaching workload clusters from the control plane
//!
//! [`ClusterConnector`] yields a [`ClusterClient`] scoped to one workload
//! cluster; [`RemoteDistributor`] uses it to land the registry TLS secret
//! there. [`ManagementClusterResolver`] answers which cluster holds the root
//! CA.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta};
use kube::Client;
use lattice_common::crd::{ClusterRef, LatticeCluster};
use lattice_common::kube_utils::{
    client_from_kubeconfig, ensure_namespace, kubeconfig_secret_name, standard_labels,
    KUBECONFIG_SECRET_KEY,
};
use lattice_common::secret_store::secret_field;
use lattice_common::{KubeSecretStore, SecretStore};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::{RegistryCaError, Result};
use crate::leaf::LeafCertificate;
use crate::{APP_NAME, CA_CERT_KEY, FIELD_MANAGER, TLS_CERT_KEY, TLS_KEY_KEY};

/// Kubernetes secret type for TLS material
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Name and namespace of a secret
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SecretKey {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

impl SecretKey {
    /// Create a secret key
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Operations against one workload cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Secret store inside the cluster
    fn secrets(&self) -> Arc<dyn SecretStore>;

    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, name: &str) -> Result<()>;
}

/// Produces clients for workload clusters
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to the given cluster
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>>;
}

/// Finds the cluster that holds control-plane state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagementClusterResolver: Send + Sync {
    /// The management cluster, or `None` if none is designated
    async fn management_cluster(&self) -> Result<Option<ClusterRef>>;
}

/// [`ClusterClient`] over a kube client
pub struct KubeClusterClient {
    client: Client,
    secrets: Arc<KubeSecretStore>,
}

impl KubeClusterClient {
    /// Wrap a client connected to a workload cluster
    pub fn new(client: Client) -> Self {
        let secrets = Arc::new(KubeSecretStore::new(client.clone(), FIELD_MANAGER));
        Self { client, secrets }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn secrets(&self) -> Arc<dyn SecretStore> {
        self.secrets.clone()
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        ensure_namespace(&self.client, name, FIELD_MANAGER)
            .await
            .map_err(|e| RegistryCaError::store("ensure", format!("namespace {name}"), e.into()))
    }
}

/// Connects to workload clusters through their CAPI kubeconfig secrets
///
/// The secret `<cluster>-kubeconfig` (key `value`) in the cluster's
/// control-plane-side namespace is read from the management cluster.
pub struct KubeClusterConnector {
    management_secrets: Arc<dyn SecretStore>,
}

impl KubeClusterConnector {
    /// Create a connector reading kubeconfigs from the given store
    pub fn new(management_secrets: Arc<dyn SecretStore>) -> Self {
        Self { management_secrets }
    }

    async fn kubeconfig(&self, cluster: &ClusterRef) -> Result<Vec<u8>> {
        let name = kubeconfig_secret_name(&cluster.name);
        let secret = self
            .management_secrets
            .get(&name, &cluster.namespace)
            .await
            .map_err(|e| {
                RegistryCaError::store("get", format!("secret {}/{}", cluster.namespace, name), e)
            })?
            .ok_or_else(|| RegistryCaError::secret_not_found(&name, &cluster.namespace))?;

        secret_field(&secret, KUBECONFIG_SECRET_KEY)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                RegistryCaError::missing_field(&name, &cluster.namespace, KUBECONFIG_SECRET_KEY)
            })
    }
}

#[async_trait]
impl ClusterConnector for KubeClusterConnector {
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>> {
        let kubeconfig = self.kubeconfig(cluster).await?;
        let client = client_from_kubeconfig(&kubeconfig)
            .await
            .map_err(|e| RegistryCaError::store("connect to", format!("cluster {cluster}"), e))?;
        debug!(cluster = %cluster, "connected to workload cluster");
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}

/// Resolves the management cluster to the LatticeCluster this operator runs on
pub struct SelfClusterResolver {
    client: Client,
    cluster_name: Option<String>,
}

impl SelfClusterResolver {
    /// Create a resolver for the named cluster (usually `LATTICE_CLUSTER_NAME`)
    pub fn new(client: Client, cluster_name: Option<String>) -> Self {
        Self {
            client,
            cluster_name,
        }
    }
}

#[async_trait]
impl ManagementClusterResolver for SelfClusterResolver {
    async fn management_cluster(&self) -> Result<Option<ClusterRef>> {
        let Some(name) = self.cluster_name.as_deref() else {
            return Ok(None);
        };

        let api: Api<LatticeCluster> = Api::all(self.client.clone());
        let cluster = match api.get(name).await {
            Ok(cluster) => cluster,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(None),
            Err(e) => {
                return Err(RegistryCaError::store(
                    "get",
                    format!("LatticeCluster {name}"),
                    e.into(),
                ))
            }
        };

        ClusterRef::from_cluster(&cluster)
            .map(Some)
            .map_err(|e| RegistryCaError::invalid_cluster(name, e.to_string()))
    }
}

/// Build a `kubernetes.io/tls` secret holding a leaf certificate
pub fn tls_secret(target: &SecretKey, leaf: &LeafCertificate) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(standard_labels(APP_NAME)),
            ..Default::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([
            (
                TLS_CERT_KEY.to_string(),
                ByteString(leaf.certificate_pem.as_bytes().to_vec()),
            ),
            (
                TLS_KEY_KEY.to_string(),
                ByteString(leaf.private_key_pem.as_bytes().to_vec()),
            ),
            (
                CA_CERT_KEY.to_string(),
                ByteString(leaf.ca_certificate_pem.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    }
}

/// Writes leaf certificates into workload clusters
pub struct RemoteDistributor {
    connector: Arc<dyn ClusterConnector>,
}

impl RemoteDistributor {
    /// Create a distributor using the given connector
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self { connector }
    }

    /// Ensure the target namespace, then apply the TLS secret
    #[instrument(skip(self, leaf), fields(cluster = %cluster, secret = %target))]
    pub async fn distribute(
        &self,
        cluster: &ClusterRef,
        target: &SecretKey,
        leaf: &LeafCertificate,
    ) -> Result<()> {
        let remote = self.connector.connect(cluster).await?;
        remote.ensure_namespace(&target.namespace).await?;
        remote
            .secrets()
            .apply(&tls_secret(target, leaf))
            .await
            .map_err(|e| {
                RegistryCaError::store(
                    "apply",
                    format!("secret {target} in cluster {cluster}"),
                    e,
                )
            })?;
        info!(cluster = %cluster, secret = %target, "registry TLS secret distributed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCluster, MemoryStore, StoreOp};

    fn leaf() -> LeafCertificate {
        LeafCertificate {
            certificate_pem: "leaf-cert".to_string(),
            private_key_pem: "leaf-key".to_string(),
            ca_certificate_pem: "root-cert".to_string(),
        }
    }

    fn connector_for(remote: Arc<MemoryCluster>) -> Arc<dyn ClusterConnector> {
        let mut connector = MockClusterConnector::new();
        connector.expect_connect().returning(move |_| {
            let client: Arc<dyn ClusterClient> = remote.clone();
            Ok(client)
        });
        Arc::new(connector)
    }

    #[tokio::test]
    async fn distribute_writes_tls_secret_after_namespace() {
        let remote = Arc::new(MemoryCluster::default());
        let distributor = RemoteDistributor::new(connector_for(remote.clone()));
        let target = SecretKey::new("lattice-registry-tls", "lattice-registry");

        distributor
            .distribute(&ClusterRef::new("workload-1", "uid-1"), &target, &leaf())
            .await
            .expect("distribution should succeed");

        assert_eq!(remote.namespaces(), vec!["lattice-registry"]);
        let secret = remote
            .store()
            .secret("lattice-registry-tls", "lattice-registry")
            .expect("secret should be written");
        assert_eq!(secret.type_.as_deref(), Some(TLS_SECRET_TYPE));
        assert_eq!(secret_field(&secret, TLS_CERT_KEY), Some(&b"leaf-cert"[..]));
        assert_eq!(secret_field(&secret, TLS_KEY_KEY), Some(&b"leaf-key"[..]));
        assert_eq!(secret_field(&secret, CA_CERT_KEY), Some(&b"root-cert"[..]));
        assert_eq!(
            secret
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("app.kubernetes.io/managed-by"))
                .map(String::as_str),
            Some("lattice")
        );
    }

    #[tokio::test]
    async fn namespace_failure_skips_secret_write() {
        let remote = Arc::new(MemoryCluster::default());
        remote.fail_namespaces();
        let distributor = RemoteDistributor::new(connector_for(remote.clone()));

        let err = distributor
            .distribute(
                &ClusterRef::new("workload-1", "uid-1"),
                &SecretKey::new("tls", "registry"),
                &leaf(),
            )
            .await
            .expect_err("namespace failure should surface");

        assert!(matches!(err, RegistryCaError::Store { .. }));
        assert!(remote.store().writes().is_empty());
    }

    #[tokio::test]
    async fn apply_failure_names_cluster_and_secret() {
        let remote = Arc::new(MemoryCluster::default());
        remote.store().fail_on(StoreOp::Apply);
        let distributor = RemoteDistributor::new(connector_for(remote));

        let err = distributor
            .distribute(
                &ClusterRef::new("workload-1", "uid-1"),
                &SecretKey::new("tls", "registry"),
                &leaf(),
            )
            .await
            .expect_err("apply failure should surface");

        let msg = err.to_string();
        assert!(msg.contains("registry/tls"));
        assert!(msg.contains("workload-1"));
    }

    #[tokio::test]
    async fn connector_reports_missing_kubeconfig() {
        let store = Arc::new(MemoryStore::default());
        let connector = KubeClusterConnector::new(store.clone());

        let err = connector
            .connect(&ClusterRef::new("workload-1", "uid-1"))
            .await
            .err()
            .expect("missing kubeconfig should fail");
        match err {
            RegistryCaError::SecretNotFound { name, namespace } => {
                assert_eq!(name, "workload-1-kubeconfig");
                assert_eq!(namespace, "capi-workload-1");
            }
            other => panic!("expected SecretNotFound, got {other:?}"),
        }

        store.insert(Secret {
            metadata: ObjectMeta {
                name: Some("workload-1-kubeconfig".to_string()),
                namespace: Some("capi-workload-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let err = connector
            .connect(&ClusterRef::new("workload-1", "uid-1"))
            .await
            .err()
            .expect("empty kubeconfig secret should fail");
        assert!(matches!(err, RegistryCaError::MissingField { ref field, .. } if field == "value"));
    }
}
