//! The subset of cert-manager's `cert-manager.io/v1` API used for delegated signing
//!
//! See <https://cert-manager.io/docs/reference/api-docs/>.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type cert-manager sets while (re)issuing a certificate
pub const CONDITION_ISSUING: &str = "Issuing";

/// Issuer spec; only the CA issuer type is modelled
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// Sign with the key pair stored in a secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

/// CA issuer backed by a `tls.crt`/`tls.key` secret in the issuer's namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret holding the signing key pair
    pub secret_name: String,
}

/// Certificate spec
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    status = "CertificateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerCertificateSpec {
    /// Secret cert-manager writes the signed key pair to
    pub secret_name: String,
    /// Subject common name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// Requested lifetime as a Go duration (e.g. "86400s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// DNS subject alternative names
    #[serde(default)]
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// Key usages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
    /// Signer
    pub issuer_ref: ObjectReference,
    /// Private key settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<CertificatePrivateKey>,
}

/// Private key parameters
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePrivateKey {
    /// Key algorithm ("RSA")
    pub algorithm: String,
    /// Key size in bits
    pub size: u32,
    /// "Always" regenerates the key on every issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_policy: Option<String>,
}

/// Reference to an issuer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Issuer name
    pub name: String,
    /// "Issuer" or "ClusterIssuer"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Certificate status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CertificateCondition>,
}

/// A status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateCondition {
    /// Condition type (e.g. "Ready", "Issuing")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}
