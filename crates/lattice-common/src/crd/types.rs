//! Shared types used by the LatticeCluster CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Endpoints a parent cluster exposes to its children
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EndpointsSpec {
    /// Host address for child agent connections
    pub host: String,

    /// gRPC port for agent connections (default: 50051)
    #[serde(default = "default_grpc_port", rename = "grpcPort")]
    pub grpc_port: u16,

    /// Bootstrap HTTPS port for kubeadm webhook (default: 8443)
    #[serde(default = "default_bootstrap_port", rename = "bootstrapPort")]
    pub bootstrap_port: u16,
}

fn default_grpc_port() -> u16 {
    crate::DEFAULT_GRPC_PORT
}

fn default_bootstrap_port() -> u16 {
    crate::DEFAULT_BOOTSTRAP_PORT
}

impl EndpointsSpec {
    /// Parse the host as an IP address, if it is one
    ///
    /// Hosts are frequently load balancer IPs (e.g. `172.18.255.1`), but may
    /// also be DNS names.
    pub fn host_ip(&self) -> Option<std::net::IpAddr> {
        self.host.parse().ok()
    }
}

/// Registry add-on settings for a cluster
///
/// Everything here is optional; an absent block means the registry runs with
/// the operator defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Extra DNS names to add to the registry serving certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_dns_names: Vec<String>,

    /// Extra IP addresses to add to the registry serving certificate
    ///
    /// Entries that do not parse as IP addresses are ignored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_ip_addresses: Vec<String>,

    /// Validity of the registry serving certificate (e.g. "720h", "90d")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_duration: Option<String>,
}
