//! TLS for the Lattice registry add-on
//!
//! A single self-signed root CA is created once per control plane and kept in
//! the management cluster. Each workload cluster gets:
//!
//! - a `ca.crt`-only copy of the root on the control-plane side
//!   (`capi-<cluster>/<cluster>-registry-addon-ca`), owned by its
//!   `LatticeCluster` so it is garbage collected with it
//! - a freshly signed registry serving certificate pushed into the workload
//!   cluster itself on every reconcile
//!
//! Signing happens in-process ([`SelfSignedIssuer`]) or through cert-manager
//! ([`DelegatedIssuer`]); [`RegistryCa`] sequences the whole flow.

#![deny(missing_docs)]

pub mod cluster_ca;
pub mod config;
pub mod delegated;
pub mod error;
pub mod issuer;
pub mod keypair;
pub mod leaf;
pub mod remote;
pub mod root;
pub mod san;

#[cfg(test)]
mod testing;

use std::future::Future;
use std::time::Duration;

pub use cluster_ca::ClusterCaProjector;
pub use config::{IssuerStrategy, RegistryCaConfig};
pub use delegated::DelegatedIssuer;
pub use error::{RegistryCaError, Result};
pub use issuer::{RegistryCa, RegistryIssuer};
pub use keypair::{verify_issued_by, CertificateInfo};
pub use leaf::{sign_leaf, LeafCertificate, SelfSignedIssuer};
pub use remote::{
    ClusterClient, ClusterConnector, KubeClusterConnector, ManagementClusterResolver,
    RemoteDistributor, SecretKey, SelfClusterResolver,
};
pub use root::{EnsureOutcome, RootCa, RootCaProvider};
pub use san::CertificateSpec;

/// Name of the root CA secret in the management cluster
pub const ROOT_CA_SECRET: &str = "registry-addon-root-ca";

/// Suffix of the per-cluster CA secret (`<cluster>-registry-addon-ca`)
pub const CLUSTER_CA_SECRET_SUFFIX: &str = "-registry-addon-ca";

/// Secret key holding a PEM certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret key holding a PEM private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Secret key holding the PEM CA bundle
pub const CA_CERT_KEY: &str = "ca.crt";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "lattice-registry-ca";

/// `app.kubernetes.io/name` of everything this crate writes
pub const APP_NAME: &str = "lattice-registry";

/// Name of the per-cluster CA secret
pub fn cluster_ca_secret_name(cluster_name: &str) -> String {
    format!("{}{}", cluster_name, CLUSTER_CA_SECRET_SUFFIX)
}

/// Run `fut`, failing with [`RegistryCaError::Timeout`] if it outlives `timeout`
///
/// The future is dropped on expiry; writes already acknowledged by the API
/// server stay in place.
pub async fn with_deadline<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryCaError::Timeout {
            what: what.to_string(),
            timeout,
        }),
    }
}
