//! LatticeCluster Custom Resource Definition
//!
//! The LatticeCluster CRD represents a Kubernetes cluster managed by Lattice.
//! Only the fields the registry add-on reads are modelled here; unknown
//! fields are ignored on deserialization.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EndpointsSpec, RegistrySpec};
use crate::Error;

/// Specification for a LatticeCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lattice.dev",
    version = "v1alpha1",
    kind = "LatticeCluster",
    plural = "latticeclusters",
    shortname = "lc",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LatticeClusterSpec {
    /// Reference to a CloudProvider for credentials and account-level config
    pub provider_ref: String,

    /// Parent configuration - if present, this cluster can accept child connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_config: Option<EndpointsSpec>,

    /// Registry add-on settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySpec>,
}

/// Identity of a cluster as seen from the management cluster
///
/// Carries the cluster name, the control-plane-side namespace holding its
/// CAPI objects (`capi-<name>`), and the UID of its `LatticeCluster` so that
/// secrets written on its behalf can be owned by it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRef {
    /// Cluster name (also the LatticeCluster name)
    pub name: String,
    /// Control-plane-side namespace for this cluster
    pub namespace: String,
    /// UID of the LatticeCluster resource
    pub uid: String,
}

impl ClusterRef {
    /// Create a reference using the conventional `capi-<name>` namespace
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            namespace: crate::capi_namespace(&name),
            name,
            uid: uid.into(),
        }
    }

    /// Build a reference from a LatticeCluster read from the API server
    ///
    /// Fails if the resource has no name or UID, which only happens for
    /// objects that were never persisted.
    pub fn from_cluster(cluster: &LatticeCluster) -> Result<Self, Error> {
        let name = cluster.name_any();
        if name.is_empty() {
            return Err(Error::validation("LatticeCluster has no name"));
        }
        let uid = cluster
            .uid()
            .ok_or_else(|| Error::validation_for_field(&name, "metadata.uid", "missing uid"))?;
        Ok(Self::new(name, uid))
    }

    /// Owner reference pointing at this cluster's LatticeCluster
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: LatticeCluster::api_version(&()).to_string(),
            kind: LatticeCluster::kind(&()).to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
