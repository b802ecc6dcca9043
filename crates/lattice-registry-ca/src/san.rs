//! Registry serving certificate subject derivation
//!
//! The registry is reached by pods through its service DNS names and by
//! kubelets through node-local `127.0.0.1`, and by child clusters through the
//! parent endpoint when this cluster is a parent. The names below cover all
//! three.

use std::net::IpAddr;
use std::time::Duration;

use kube::ResourceExt;
use lattice_common::crd::LatticeCluster;
use tracing::debug;

use crate::config::RegistryCaConfig;
use crate::error::{RegistryCaError, Result};

/// Subject and lifetime of a leaf certificate
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateSpec {
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// IP subject alternative names as text; unparseable entries are skipped
    pub ip_addresses: Vec<String>,
    /// Lifetime; `None` means the configured default
    pub duration: Option<Duration>,
}

impl CertificateSpec {
    /// IP SANs that parse, in order
    pub fn parsed_ip_addresses(&self) -> Vec<IpAddr> {
        self.ip_addresses
            .iter()
            .filter_map(|raw| match raw.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    debug!(ip = %raw, "skipping unparseable IP SAN");
                    None
                }
            })
            .collect()
    }
}

/// Build the registry certificate spec for a cluster
pub fn registry_certificate_spec(
    cluster: &LatticeCluster,
    config: &RegistryCaConfig,
) -> Result<CertificateSpec> {
    let svc = &config.registry_service;
    let ns = &config.registry_namespace;
    let fqdn = config.registry_fqdn();

    let mut dns_names = vec![
        svc.clone(),
        format!("{svc}.{ns}"),
        format!("{svc}.{ns}.svc"),
        fqdn.clone(),
    ];
    let mut ip_addresses = vec!["127.0.0.1".to_string()];
    let mut duration = None;

    if let Some(endpoint_ip) = cluster
        .spec
        .parent_config
        .as_ref()
        .and_then(|p| p.host_ip())
    {
        ip_addresses.push(endpoint_ip.to_string());
    }

    if let Some(registry) = &cluster.spec.registry {
        dns_names.extend(registry.additional_dns_names.iter().cloned());
        ip_addresses.extend(registry.additional_ip_addresses.iter().cloned());

        if let Some(raw) = &registry.certificate_duration {
            let parsed = humantime::parse_duration(raw).map_err(|e| {
                RegistryCaError::invalid_cluster(
                    cluster.name_any(),
                    format!("spec.registry.certificateDuration {:?}: {}", raw, e),
                )
            })?;
            duration = Some(parsed);
        }
    }

    dedup_in_order(&mut dns_names);
    dedup_in_order(&mut ip_addresses);

    Ok(CertificateSpec {
        common_name: fqdn,
        dns_names,
        ip_addresses,
        duration,
    })
}

fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}
