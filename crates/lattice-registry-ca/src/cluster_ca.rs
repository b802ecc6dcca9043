//! Per-cluster projection of the root CA certificate
//!
//! Each workload cluster gets `capi-<cluster>/<cluster>-registry-addon-ca`
//! holding only `ca.crt`. The private key never leaves the root secret.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use lattice_common::crd::ClusterRef;
use lattice_common::kube_utils::standard_labels;
use lattice_common::SecretStore;
use tracing::{info, instrument};

use crate::error::{RegistryCaError, Result};
use crate::remote::SecretKey;
use crate::root::RootCaProvider;
use crate::{cluster_ca_secret_name, APP_NAME, CA_CERT_KEY};

/// Writes the public root certificate into each cluster's namespace
pub struct ClusterCaProjector {
    store: Arc<dyn SecretStore>,
    root: Arc<RootCaProvider>,
}

impl ClusterCaProjector {
    /// Create a projector writing to the management cluster's store
    pub fn new(store: Arc<dyn SecretStore>, root: Arc<RootCaProvider>) -> Self {
        Self { store, root }
    }

    /// Apply the cluster CA secret, overwriting whatever is there
    #[instrument(skip(self), fields(cluster = %cluster))]
    pub async fn ensure_cluster_ca(&self, cluster: &ClusterRef) -> Result<SecretKey> {
        let root = self.root.load_root_ca().await?;
        let key = SecretKey::new(cluster_ca_secret_name(&cluster.name), &cluster.namespace);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                labels: Some(standard_labels(APP_NAME)),
                owner_references: Some(vec![cluster.owner_reference()]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CA_CERT_KEY.to_string(),
                ByteString(root.certificate_pem.into_bytes()),
            )])),
            ..Default::default()
        };

        self.store
            .apply(&secret)
            .await
            .map_err(|e| RegistryCaError::store("apply", format!("secret {key}"), e))?;

        info!(cluster = %cluster, secret = %key, "projected registry CA");
        Ok(key)
    }
}
