//! Registry CA configuration
//!
//! Defaults suit a standard Lattice install; the operator deployment can
//! override a few of them through environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RegistryCaError, Result};

/// Environment variable naming this cluster's LatticeCluster
pub const ENV_CLUSTER_NAME: &str = "LATTICE_CLUSTER_NAME";
/// Environment variable selecting the issuer strategy
pub const ENV_ISSUER: &str = "LATTICE_REGISTRY_ISSUER";
/// Environment variable overriding the default leaf certificate duration
pub const ENV_CERT_DURATION: &str = "LATTICE_REGISTRY_CERT_DURATION";

const DAY: u64 = 24 * 60 * 60;

/// How leaf certificates get signed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IssuerStrategy {
    /// Sign in-process with the root key
    #[default]
    SelfSigned,
    /// Hand signing to cert-manager through a CA Issuer backed by the root secret
    Delegated,
}

impl fmt::Display for IssuerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfSigned => write!(f, "self-signed"),
            Self::Delegated => write!(f, "cert-manager"),
        }
    }
}

impl FromStr for IssuerStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "self-signed" | "selfsigned" => Ok(Self::SelfSigned),
            "cert-manager" | "certmanager" | "delegated" => Ok(Self::Delegated),
            other => Err(format!(
                "unknown issuer '{}', expected self-signed or cert-manager",
                other
            )),
        }
    }
}

/// Configuration for the registry CA
#[derive(Debug, Clone)]
pub struct RegistryCaConfig {
    /// Name of the LatticeCluster this operator runs on, if known
    pub cluster_name: Option<String>,
    /// Leaf signing strategy
    pub issuer: IssuerStrategy,
    /// Subject CN of the root CA
    pub root_common_name: String,
    /// Lifetime of the root CA
    pub root_validity: Duration,
    /// Leaf lifetime when the cluster does not set one
    pub leaf_validity: Duration,
    /// Namespace the registry runs in on workload clusters
    pub registry_namespace: String,
    /// Registry service name (drives the certificate SANs)
    pub registry_service: String,
    /// Name of the TLS secret the registry mounts
    pub registry_secret: String,
    /// Upper bound on one full reconcile
    pub operation_timeout: Duration,
    /// Interval between checks for a cert-manager issued secret
    pub poll_interval: Duration,
    /// How long to wait for cert-manager to issue
    pub poll_timeout: Duration,
}

impl Default for RegistryCaConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            issuer: IssuerStrategy::SelfSigned,
            root_common_name: "Lattice Registry Root CA".to_string(),
            root_validity: Duration::from_secs(3650 * DAY),
            leaf_validity: Duration::from_secs(730 * DAY),
            registry_namespace: "lattice-registry".to_string(),
            registry_service: "lattice-registry".to_string(),
            registry_secret: "lattice-registry-tls".to_string(),
            operation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryCaConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_CLUSTER_NAME).filter(|v| !v.is_empty()) {
            config.cluster_name = Some(name);
        }

        if let Some(value) = lookup(ENV_ISSUER) {
            config.issuer = value
                .parse()
                .map_err(|message| invalid(ENV_ISSUER, &value, message))?;
        }

        if let Some(value) = lookup(ENV_CERT_DURATION) {
            config.leaf_validity = humantime::parse_duration(&value)
                .map_err(|e| invalid(ENV_CERT_DURATION, &value, e.to_string()))?;
        }

        Ok(config)
    }

    /// Fully qualified in-cluster DNS name of the registry service
    pub fn registry_fqdn(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.registry_service, self.registry_namespace
        )
    }
}

fn invalid(variable: &str, value: &str, message: String) -> RegistryCaError {
    RegistryCaError::InvalidConfig {
        variable: variable.to_string(),
        value: value.to_string(),
        message,
    }
}
