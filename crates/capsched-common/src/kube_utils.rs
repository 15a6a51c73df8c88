//! Kubernetes client construction and API resource discovery
//!
//! Cluster API types are served at different versions depending on the
//! installed CAPI release, so resources are resolved through discovery rather
//! than hard-coded.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery};
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

/// Discover the API version for a resource group/kind.
///
/// Searches all versions within the group, picking the highest stability
/// version for each kind.
///
/// # Returns
/// The full api_version string (e.g., "cluster.x-k8s.io/v1beta1"), or `None`
/// if the kind is not served by the API server.
pub async fn discover_api_version(
    client: &Client,
    group: &str,
    kind: &str,
) -> Result<Option<String>, kube::Error> {
    let discovery = Discovery::new(client.clone())
        .filter(&[group])
        .run()
        .await?;

    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                debug!(group = %group, kind = %kind, api_version = %ar.api_version, "Discovered API version");
                return Ok(Some(ar.api_version.clone()));
            }
        }
    }

    Ok(None)
}

/// Build an ApiResource using discovery to find the served version.
///
/// Returns a permanent [`Error::Config`] when the kind is not installed (CAPI
/// CRDs missing), and passes transport failures through as `kube::Error` so
/// the caller can classify them.
pub async fn build_api_resource_with_discovery(
    client: &Client,
    group: &str,
    kind: &str,
) -> Result<ApiResource, Error> {
    let api_version = discover_api_version(client, group, kind)
        .await?
        .ok_or_else(|| {
            Error::config(format!(
                "resource {}/{} is not served by the API server (are the Cluster API CRDs installed?)",
                group, kind
            ))
        })?;
    Ok(build_api_resource(&api_version, kind))
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use capsched_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("cluster.x-k8s.io/v1beta1");
/// assert_eq!(group, "cluster.x-k8s.io");
/// assert_eq!(version, "v1beta1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Create a kube client from an optional kubeconfig path with explicit timeouts.
///
/// Without a path the config is inferred (in-cluster service account, then
/// `KUBECONFIG` / `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config_at(
                    path.display().to_string(),
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::config_at(
                        path.display().to_string(),
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
