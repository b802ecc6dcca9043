//! Shared Kubernetes utilities using kube-rs
//!
//! Namespace creation, workload-cluster clients built from CAPI kubeconfig
//! secrets, bounded polling, and the standard label set.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::time::Instant;
use tracing::trace;

use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_LATTICE, LABEL_NAME};

/// Key holding the kubeconfig inside a CAPI `<cluster>-kubeconfig` secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Name of the CAPI-generated kubeconfig secret for a cluster
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{}-kubeconfig", cluster_name)
}

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and doesn't
/// race with concurrent creators.
pub async fn ensure_namespace(
    client: &Client,
    name: &str,
    field_manager: &str,
) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(field_manager), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch. Returns `kube::Error` so callers can map to their own error type.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Build a client from raw kubeconfig bytes (e.g. a CAPI kubeconfig secret)
pub async fn client_from_kubeconfig(kubeconfig_data: &[u8]) -> Result<Client, Error> {
    let kubeconfig_str = std::str::from_utf8(kubeconfig_data).map_err(|e| {
        Error::internal_with_context("kubeconfig", format!("invalid kubeconfig UTF-8: {e}"))
    })?;

    let kubeconfig: Kubeconfig = serde_yaml::from_str(kubeconfig_str)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", format!("invalid YAML: {e}")))?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context("kubeconfig", format!("failed to build config: {e}"))
        })?;

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("kubeconfig", format!("failed to create client: {e}"))
    })
}

/// Wait for a resource to become available
///
/// `poll_fn` returns `Ok(Some(T))` when ready and `Ok(None)` to keep
/// waiting. Errors from `poll_fn` end the wait immediately; callers decide
/// whether to retry the whole operation. On expiry the wait fails with
/// [`Error::Timeout`] converted into the caller's error type.
pub async fn wait_for_resource<T, E, F, Fut>(
    description: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut poll_fn: F,
) -> Result<T, E>
where
    E: From<Error>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = poll_fn().await? {
            return Ok(value);
        }

        if start.elapsed() >= timeout {
            return Err(Error::timeout(description, timeout).into());
        }

        trace!(what = description, "resource not ready, polling again");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Standard `app.kubernetes.io` labels for resources Lattice writes
pub fn standard_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_LATTICE.to_string(),
        ),
    ])
}
