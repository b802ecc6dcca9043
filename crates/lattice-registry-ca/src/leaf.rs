//! Registry serving certificates signed in-process by the root CA
//!
//! Every call mints a new key and certificate. Everything that can fail
//! locally (loading the root, parsing it, signing) happens before the single
//! remote write, so a failed issuance leaves the previous leaf in place.

use std::sync::Arc;
use std::time::Duration;

use lattice_common::crd::ClusterRef;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::keypair::{generate, KeyPairSpec};
use crate::remote::{RemoteDistributor, SecretKey};
use crate::root::{RootCa, RootCaProvider};
use crate::san::CertificateSpec;

/// A signed leaf with its key and the CA bundle to trust it
#[derive(Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    /// PEM leaf certificate
    pub certificate_pem: String,
    /// PEM leaf private key
    pub private_key_pem: String,
    /// PEM root certificate
    pub ca_certificate_pem: String,
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("ca_certificate_pem", &self.ca_certificate_pem)
            .finish_non_exhaustive()
    }
}

/// Sign `spec` with `root`
pub fn sign_leaf(
    root: &RootCa,
    spec: &CertificateSpec,
    default_validity: Duration,
) -> Result<LeafCertificate> {
    let authority = root.signing_authority()?;
    let ip_addresses = spec.parsed_ip_addresses();

    let pair = generate(KeyPairSpec {
        common_name: &spec.common_name,
        dns_names: &spec.dns_names,
        ip_addresses: &ip_addresses,
        validity: spec.duration.unwrap_or(default_validity),
        is_ca: false,
        issuer: Some(&authority),
    })?;

    Ok(LeafCertificate {
        certificate_pem: pair.certificate_pem,
        private_key_pem: pair.private_key_pem,
        ca_certificate_pem: root.certificate_pem.clone(),
    })
}

/// Issues registry certificates by signing with the root key directly
pub struct SelfSignedIssuer {
    root: Arc<RootCaProvider>,
    distributor: Arc<RemoteDistributor>,
    default_validity: Duration,
}

impl SelfSignedIssuer {
    /// Create an issuer; `default_validity` applies when a spec has no duration
    pub fn new(
        root: Arc<RootCaProvider>,
        distributor: Arc<RemoteDistributor>,
        default_validity: Duration,
    ) -> Self {
        Self {
            root,
            distributor,
            default_validity,
        }
    }

    /// Mint a new leaf for `cluster` and apply it at `target` inside the cluster
    #[instrument(skip(self, spec), fields(cluster = %cluster, secret = %target))]
    pub async fn issue_and_distribute(
        &self,
        cluster: &ClusterRef,
        target: &SecretKey,
        spec: &CertificateSpec,
    ) -> Result<LeafCertificate> {
        let root = self.root.load_root_ca().await?;
        let leaf = sign_leaf(&root, spec, self.default_validity)?;
        debug!(cluster = %cluster, common_name = %spec.common_name, "signed registry certificate");

        self.distributor.distribute(cluster, target, &leaf).await?;
        Ok(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryCaConfig;
    use crate::error::RegistryCaError;
    use crate::keypair::{verify_issued_by, CertificateInfo};
    use crate::remote::{
        ClusterClient, MockClusterConnector, MockManagementClusterResolver,
    };
    use crate::testing::{MemoryCluster, MemoryStore, StoreOp};
    use crate::{ROOT_CA_SECRET, TLS_CERT_KEY, TLS_KEY_KEY};
    use lattice_common::secret_store::secret_field;

    const TWO_YEARS: i64 = 730 * 24 * 3600;
    const SKEW: i64 = 300;

    struct Harness {
        management: Arc<MemoryStore>,
        remote: Arc<MemoryCluster>,
        root: Arc<RootCaProvider>,
        issuer: SelfSignedIssuer,
    }

    fn harness() -> Harness {
        let mut resolver = MockManagementClusterResolver::new();
        resolver
            .expect_management_cluster()
            .returning(|| Ok(Some(ClusterRef::new("mgmt", "uid-mgmt"))));

        let management = Arc::new(MemoryStore::default());
        let remote = Arc::new(MemoryCluster::default());
        let root = Arc::new(RootCaProvider::new(
            management.clone(),
            Arc::new(resolver),
            RegistryCaConfig::default(),
        ));

        let connected = remote.clone();
        let mut connector = MockClusterConnector::new();
        connector.expect_connect().returning(move |_| {
            let client: Arc<dyn ClusterClient> = connected.clone();
            Ok(client)
        });

        let issuer = SelfSignedIssuer::new(
            root.clone(),
            Arc::new(RemoteDistributor::new(Arc::new(connector))),
            RegistryCaConfig::default().leaf_validity,
        );

        Harness {
            management,
            remote,
            root,
            issuer,
        }
    }

    fn cluster() -> ClusterRef {
        ClusterRef::new("workload-1", "uid-1")
    }

    fn target() -> SecretKey {
        SecretKey::new("lattice-registry-tls", "lattice-registry")
    }

    fn scenario_spec() -> CertificateSpec {
        CertificateSpec {
            common_name: "registry".to_string(),
            dns_names: vec!["registry.svc".to_string()],
            ip_addresses: vec!["127.0.0.1".to_string()],
            duration: Some(Duration::from_secs(24 * 3600)),
        }
    }

    #[tokio::test]
    async fn issued_leaf_matches_request_and_verifies_against_root() {
        let h = harness();
        h.root.ensure_root_ca().await.expect("root should be created");

        let leaf = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect("issuance should succeed");

        let info = CertificateInfo::from_pem(&leaf.certificate_pem).expect("leaf parses");
        assert_eq!(info.common_name, "registry");
        assert_eq!(info.dns_names, vec!["registry.svc"]);
        assert_eq!(info.ip_addresses.len(), 1);
        assert_eq!(info.ip_addresses[0].to_string(), "127.0.0.1");
        assert!((info.lifetime_secs() - (24 * 3600 + SKEW)).abs() <= 5);
        assert!(info.key_bits.unwrap_or(0) >= 2048);
        assert!(info.server_auth);
        assert!(!info.is_ca);

        let root = h.root.load_root_ca().await.expect("root loads");
        assert_eq!(leaf.ca_certificate_pem, root.certificate_pem);
        assert!(verify_issued_by(&leaf.certificate_pem, &root.certificate_pem).expect("parses"));

        let written = h
            .remote
            .store()
            .secret("lattice-registry-tls", "lattice-registry")
            .expect("leaf secret should be in the workload cluster");
        assert_eq!(
            secret_field(&written, TLS_CERT_KEY),
            Some(leaf.certificate_pem.as_bytes())
        );
        assert_eq!(
            secret_field(&written, TLS_KEY_KEY),
            Some(leaf.private_key_pem.as_bytes())
        );
        assert_eq!(h.remote.namespaces(), vec!["lattice-registry"]);
    }

    #[tokio::test]
    async fn every_issuance_is_fresh() {
        let h = harness();
        h.root.ensure_root_ca().await.expect("root should be created");

        let first = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect("first issuance");
        let second = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect("second issuance");

        let a = CertificateInfo::from_pem(&first.certificate_pem).expect("parses");
        let b = CertificateInfo::from_pem(&second.certificate_pem).expect("parses");
        assert_ne!(a.serial, b.serial);
        assert_ne!(first.private_key_pem, second.private_key_pem);

        let written = h
            .remote
            .store()
            .secret("lattice-registry-tls", "lattice-registry")
            .expect("leaf secret should exist");
        assert_eq!(
            secret_field(&written, TLS_CERT_KEY),
            Some(second.certificate_pem.as_bytes())
        );
    }

    #[tokio::test]
    async fn unset_duration_defaults_to_two_years() {
        let h = harness();
        h.root.ensure_root_ca().await.expect("root should be created");
        let spec = CertificateSpec {
            duration: None,
            ..scenario_spec()
        };

        let leaf = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &spec)
            .await
            .expect("issuance should succeed");

        let info = CertificateInfo::from_pem(&leaf.certificate_pem).expect("parses");
        assert!((info.lifetime_secs() - TWO_YEARS).abs() <= SKEW + 5);
    }

    #[tokio::test]
    async fn missing_root_fails_before_any_remote_call() {
        let mut resolver = MockManagementClusterResolver::new();
        resolver
            .expect_management_cluster()
            .returning(|| Ok(Some(ClusterRef::new("mgmt", "uid-mgmt"))));
        let mut connector = MockClusterConnector::new();
        connector.expect_connect().never();

        let root = Arc::new(RootCaProvider::new(
            Arc::new(MemoryStore::default()),
            Arc::new(resolver),
            RegistryCaConfig::default(),
        ));
        let issuer = SelfSignedIssuer::new(
            root,
            Arc::new(RemoteDistributor::new(Arc::new(connector))),
            Duration::from_secs(3600),
        );

        let err = issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect_err("issuance without root should fail");
        match err {
            RegistryCaError::SecretNotFound { name, .. } => assert_eq!(name, ROOT_CA_SECRET),
            other => panic!("expected SecretNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_distribution_leaves_previous_leaf() {
        let h = harness();
        h.root.ensure_root_ca().await.expect("root should be created");

        let first = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect("first issuance");

        h.remote.store().fail_on(StoreOp::Apply);
        let err = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect_err("remote failure should surface");
        assert!(matches!(err, RegistryCaError::Store { .. }));

        let written = h
            .remote
            .store()
            .secret("lattice-registry-tls", "lattice-registry")
            .expect("previous leaf should remain");
        assert_eq!(
            secret_field(&written, TLS_CERT_KEY),
            Some(first.certificate_pem.as_bytes())
        );

        h.remote.store().heal(StoreOp::Apply);
        h.issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect("issuance should recover once the cluster is reachable");
    }

    #[tokio::test]
    async fn corrupt_root_is_a_decode_error_with_no_remote_write() {
        let h = harness();
        h.management.insert(
            RootCa {
                certificate_pem: "garbage".to_string(),
                private_key_pem: "garbage".to_string(),
            }
            .to_secret(&SecretKey::new(ROOT_CA_SECRET, "capi-mgmt")),
        );

        let err = h
            .issuer
            .issue_and_distribute(&cluster(), &target(), &scenario_spec())
            .await
            .expect_err("corrupt root should fail");
        assert!(matches!(err, RegistryCaError::Decode { .. }));
        assert!(h.remote.store().writes().is_empty());
        assert!(h.remote.namespaces().is_empty());
    }

    #[test]
    fn unparseable_ip_sans_are_skipped_when_signing() {
        let root = RootCa::generate(&RegistryCaConfig::default()).expect("root generates");
        let spec = CertificateSpec {
            ip_addresses: vec!["bogus".to_string(), "10.1.2.3".to_string()],
            ..scenario_spec()
        };

        let leaf = sign_leaf(&root, &spec, Duration::from_secs(3600)).expect("signs");
        let info = CertificateInfo::from_pem(&leaf.certificate_pem).expect("parses");
        assert_eq!(info.ip_addresses.len(), 1);
        assert_eq!(info.ip_addresses[0].to_string(), "10.1.2.3");
    }
}
