//! Common types for Lattice: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod secret_store;

pub use error::Error;
pub use secret_store::{CreateOutcome, KubeSecretStore, SecretStore};

/// Default port for the bootstrap HTTPS server
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 8443;

/// Default port for the gRPC server (agent-cell communication)
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Label key naming the application a resource belongs to
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label key naming the tool managing a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on resources Lattice writes
pub const LABEL_MANAGED_BY_LATTICE: &str = "lattice";

/// Control-plane-side namespace holding a cluster's CAPI resources
pub fn capi_namespace(cluster_name: &str) -> String {
    format!("capi-{}", cluster_name)
}
