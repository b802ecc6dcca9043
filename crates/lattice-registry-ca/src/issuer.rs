//! Strategy selection and the per-cluster reconcile sequence

use std::sync::Arc;

use kube::{Client, ResourceExt};
use lattice_common::crd::{ClusterRef, LatticeCluster};
use lattice_common::{KubeSecretStore, SecretStore};
use tracing::{info, instrument};

use crate::cluster_ca::ClusterCaProjector;
use crate::config::{IssuerStrategy, RegistryCaConfig};
use crate::delegated::{DelegatedIssuer, KubeCertManagerClient};
use crate::error::{RegistryCaError, Result};
use crate::leaf::{LeafCertificate, SelfSignedIssuer};
use crate::remote::{
    ClusterConnector, KubeClusterConnector, ManagementClusterResolver, RemoteDistributor,
    SecretKey, SelfClusterResolver,
};
use crate::root::RootCaProvider;
use crate::san::{registry_certificate_spec, CertificateSpec};
use crate::{with_deadline, FIELD_MANAGER};

/// How registry leaf certificates get signed
pub enum RegistryIssuer {
    /// Signed in-process with the root key
    SelfSigned(SelfSignedIssuer),
    /// Signed by cert-manager using the root as a CA issuer
    Delegated(DelegatedIssuer),
}

impl RegistryIssuer {
    /// Issue a leaf for `cluster` and apply it at `target` inside the cluster
    pub async fn issue_and_distribute(
        &self,
        cluster: &ClusterRef,
        target: &SecretKey,
        spec: &CertificateSpec,
    ) -> Result<LeafCertificate> {
        match self {
            Self::SelfSigned(issuer) => issuer.issue_and_distribute(cluster, target, spec).await,
            Self::Delegated(issuer) => issuer.issue_and_distribute(cluster, target, spec).await,
        }
    }

    /// Which strategy this issuer implements
    pub fn strategy(&self) -> IssuerStrategy {
        match self {
            Self::SelfSigned(_) => IssuerStrategy::SelfSigned,
            Self::Delegated(_) => IssuerStrategy::Delegated,
        }
    }
}

/// Registry PKI for one control plane
pub struct RegistryCa {
    root: Arc<RootCaProvider>,
    projector: ClusterCaProjector,
    issuer: RegistryIssuer,
    config: RegistryCaConfig,
}

impl RegistryCa {
    /// Assemble from already-built parts
    pub fn new(
        root: Arc<RootCaProvider>,
        projector: ClusterCaProjector,
        issuer: RegistryIssuer,
        config: RegistryCaConfig,
    ) -> Self {
        Self {
            root,
            projector,
            issuer,
            config,
        }
    }

    /// Wire the in-process issuer over arbitrary collaborators
    pub fn self_signed(
        management_secrets: Arc<dyn SecretStore>,
        resolver: Arc<dyn ManagementClusterResolver>,
        connector: Arc<dyn ClusterConnector>,
        config: RegistryCaConfig,
    ) -> Self {
        let root = Arc::new(RootCaProvider::new(
            management_secrets.clone(),
            resolver,
            config.clone(),
        ));
        let projector = ClusterCaProjector::new(management_secrets, root.clone());
        let distributor = Arc::new(RemoteDistributor::new(connector));
        let issuer = RegistryIssuer::SelfSigned(SelfSignedIssuer::new(
            root.clone(),
            distributor,
            config.leaf_validity,
        ));
        Self::new(root, projector, issuer, config)
    }

    /// Wire everything against the management cluster's API server
    pub fn with_kube(client: Client, config: RegistryCaConfig) -> Self {
        let secrets: Arc<dyn SecretStore> =
            Arc::new(KubeSecretStore::new(client.clone(), FIELD_MANAGER));
        let resolver = Arc::new(SelfClusterResolver::new(
            client.clone(),
            config.cluster_name.clone(),
        ));
        let connector = Arc::new(KubeClusterConnector::new(secrets.clone()));

        match config.issuer {
            IssuerStrategy::SelfSigned => Self::self_signed(secrets, resolver, connector, config),
            IssuerStrategy::Delegated => {
                let root = Arc::new(RootCaProvider::new(
                    secrets.clone(),
                    resolver,
                    config.clone(),
                ));
                let projector = ClusterCaProjector::new(secrets.clone(), root.clone());
                let issuer = RegistryIssuer::Delegated(DelegatedIssuer::new(
                    Arc::new(KubeCertManagerClient::new(client)),
                    secrets,
                    root.clone(),
                    Arc::new(RemoteDistributor::new(connector)),
                    config.clone(),
                ));
                Self::new(root, projector, issuer, config)
            }
        }
    }

    /// The root CA provider
    pub fn root(&self) -> &Arc<RootCaProvider> {
        &self.root
    }

    /// The configured issuer
    pub fn issuer(&self) -> &RegistryIssuer {
        &self.issuer
    }

    /// Where the registry TLS secret lives inside workload clusters
    pub fn registry_secret_key(&self) -> SecretKey {
        SecretKey::new(
            &self.config.registry_secret,
            &self.config.registry_namespace,
        )
    }

    /// Bring a cluster's registry TLS up to date
    ///
    /// Ensures the root, projects its certificate into the cluster's
    /// namespace, then issues and pushes a fresh serving certificate. The
    /// whole sequence is bounded by `operation_timeout`.
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    pub async fn reconcile(&self, cluster: &LatticeCluster) -> Result<LeafCertificate> {
        let name = cluster.name_any();
        with_deadline(
            self.config.operation_timeout,
            &format!("registry TLS reconcile of cluster {name}"),
            async {
                let cluster_ref = ClusterRef::from_cluster(cluster)
                    .map_err(|e| RegistryCaError::invalid_cluster(&name, e.to_string()))?;

                self.root.ensure_root_ca().await?;
                self.projector.ensure_cluster_ca(&cluster_ref).await?;

                let spec = registry_certificate_spec(cluster, &self.config)?;
                let target = self.registry_secret_key();
                let leaf = self
                    .issuer
                    .issue_and_distribute(&cluster_ref, &target, &spec)
                    .await?;

                info!(
                    cluster = %cluster_ref,
                    strategy = %self.issuer.strategy(),
                    "registry TLS reconciled"
                );
                Ok(leaf)
            },
        )
        .await
    }
}
