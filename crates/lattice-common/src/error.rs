//! Error types shared by Lattice crates
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries enough context (cluster, resource kind, operation)
//! to diagnose a failure without reading the code that raised it.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Lattice operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs or resource metadata
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.registry.certificateDuration")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A bounded wait ran out of time
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// How long we waited
        timeout: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "secret-store", "kubeconfig")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without cluster context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    /// Kubernetes errors are retryable unless the API rejected the request with a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn validation_errors_carry_cluster_and_field() {
        let err = Error::validation_for_field(
            "workload-1",
            "spec.registry.certificateDuration",
            "invalid duration",
        );
        assert!(err.to_string().contains("workload-1"));
        assert!(!err.is_retryable());

        match err {
            Error::Validation { cluster, field, .. } => {
                assert_eq!(cluster, "workload-1");
                assert_eq!(field.as_deref(), Some("spec.registry.certificateDuration"))
            }
            _ => panic!("expected Validation"),
        }
    }

    #[test]
    fn kube_client_errors_are_not_retryable() {
        assert!(!Error::from(api_error(404)).is_retryable());
        assert!(!Error::from(api_error(422)).is_retryable());
        assert!(Error::from(api_error(503)).is_retryable());
    }

    #[test]
    fn timeout_message_names_the_operation() {
        let err = Error::timeout("secret capi-a/tls", Duration::from_secs(10));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("secret capi-a/tls"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn internal_errors_keep_context() {
        let err = Error::internal_with_context("kubeconfig", "missing value key");
        assert_eq!(
            err.to_string(),
            "internal error [kubeconfig]: missing value key"
        );
    }

    #[test]
    fn serialization_errors_are_permanent() {
        let err = Error::serialization_for_kind("Secret", "bad json");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad json"));
    }
}
