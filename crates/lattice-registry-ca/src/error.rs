//! Error types for registry CA operations
//!
//! Every variant names the secret, field, or cluster involved so a failed
//! reconcile can be diagnosed from the error message alone.

use std::time::Duration;

use thiserror::Error;

/// Registry CA errors
#[derive(Debug, Error)]
pub enum RegistryCaError {
    /// A required secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
    },

    /// A secret exists but lacks a required data key
    #[error("secret {namespace}/{name} is missing field {field}")]
    MissingField {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// Missing data key
        field: String,
    },

    /// No LatticeCluster is designated as the management cluster
    #[error("management cluster is not designated")]
    ManagementClusterUndesignated,

    /// PEM framing is malformed or carries an unexpected label
    #[error("failed to decode {context}: {message}")]
    Decode {
        /// What was being decoded (e.g. "root CA certificate")
        context: String,
        /// Underlying failure
        message: String,
    },

    /// DER or key material could not be parsed
    #[error("failed to parse {context}: {message}")]
    Parse {
        /// What was being parsed
        context: String,
        /// Underlying failure
        message: String,
    },

    /// The private key is in an encoding we cannot load
    #[error("unsupported key encoding for {context}: PEM label {label:?}")]
    UnsupportedKeyEncoding {
        /// Which key
        context: String,
        /// PEM label found
        label: String,
    },

    /// Key generation or certificate signing failed
    #[error("failed to sign {context}: {message}")]
    Signing {
        /// What was being generated
        context: String,
        /// Underlying failure
        message: String,
    },

    /// A persistence or network call failed
    #[error("failed to {operation} {target}: {message}")]
    Store {
        /// Operation attempted (e.g. "create", "apply")
        operation: String,
        /// Object the operation targeted (e.g. "secret capi-a/a-registry-addon-ca")
        target: String,
        /// Underlying failure
        message: String,
        /// Whether the underlying failure is transient
        retryable: bool,
    },

    /// A bounded wait or deadline expired
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// How long we waited
        timeout: Duration,
    },

    /// An environment setting could not be parsed
    #[error("invalid configuration {variable}={value:?}: {message}")]
    InvalidConfig {
        /// Environment variable name
        variable: String,
        /// Offending value
        value: String,
        /// Why it was rejected
        message: String,
    },

    /// The cluster resource is unusable (missing uid, bad registry settings)
    #[error("invalid cluster {cluster}: {message}")]
    InvalidCluster {
        /// Cluster name
        cluster: String,
        /// What is wrong
        message: String,
    },
}

impl RegistryCaError {
    /// Create a secret-not-found error
    pub fn secret_not_found(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::SecretNotFound {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a missing-field error
    pub fn missing_field(
        name: impl Into<String>,
        namespace: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::MissingField {
            name: name.into(),
            namespace: namespace.into(),
            field: field.into(),
        }
    }

    /// Create a decode error
    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error
    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a signing error
    pub fn signing(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Signing {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a lattice-common error from a store call with operation context
    pub fn store(
        operation: impl Into<String>,
        target: impl Into<String>,
        source: lattice_common::Error,
    ) -> Self {
        match source {
            lattice_common::Error::Timeout { operation, timeout } => Self::Timeout {
                what: operation,
                timeout,
            },
            other => Self::Store {
                operation: operation.into(),
                target: target.into(),
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }

    /// Create an invalid-cluster error
    pub fn invalid_cluster(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCluster {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// True for the not-found family (secret, field, management cluster)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SecretNotFound { .. }
                | Self::MissingField { .. }
                | Self::ManagementClusterUndesignated
        )
    }

    /// Whether the next reconcile may succeed without operator intervention
    ///
    /// Missing secrets are retryable: the root may be created by a concurrent
    /// reconcile, and cert-manager may not have issued yet. Corrupt material
    /// is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SecretNotFound { .. } | Self::ManagementClusterUndesignated => true,
            Self::Timeout { .. } => true,
            Self::Store { retryable, .. } => *retryable,
            Self::MissingField { .. }
            | Self::Decode { .. }
            | Self::Parse { .. }
            | Self::UnsupportedKeyEncoding { .. }
            | Self::Signing { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidCluster { .. } => false,
        }
    }
}

impl From<lattice_common::Error> for RegistryCaError {
    fn from(e: lattice_common::Error) -> Self {
        Self::store("call", "kubernetes api", e)
    }
}

/// Result type for registry CA operations
pub type Result<T> = std::result::Result<T, RegistryCaError>;
