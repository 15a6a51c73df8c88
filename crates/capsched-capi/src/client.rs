//! Control plane client for reading and resizing pools
//!
//! Provides a trait-based abstraction over the pool-management API, allowing
//! tests to substitute fakes while production code talks to Cluster API
//! MachineDeployments through the Kubernetes API.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use capsched_common::kube_utils::build_api_resource_with_discovery;
use capsched_common::metrics::CallTimer;
use capsched_common::{Error, FIELD_MANAGER};

use crate::pool::{CapacityTarget, PoolId, PoolState, AUTOSCALER_MAX_SIZE, AUTOSCALER_MIN_SIZE};

/// API group serving MachineDeployments
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";
/// Kind of the pool resource
pub const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";

/// Trait abstracting the pool-management API
///
/// Implementations classify failures into [`Error::PoolNotFound`],
/// [`Error::TransientControlPlane`] and [`Error::RejectedByControlPlane`] so
/// callers never need to inspect transport details.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolClient: Send + Sync {
    /// Read the current state of a pool
    async fn get_pool_state(&self, pool: &PoolId) -> Result<PoolState, Error>;

    /// Request a new capacity tuple for a pool.
    ///
    /// When `expected_resource_version` is set, the control plane rejects the
    /// request with a conflict if the pool changed since it was read.
    /// Returns the state acknowledged by the control plane; the pool is not
    /// expected to have converged.
    async fn update_pool_capacity(
        &self,
        pool: &PoolId,
        target: CapacityTarget,
        expected_resource_version: Option<String>,
    ) -> Result<PoolState, Error>;
}

/// Real client implementation using DynamicObject for MachineDeployments
pub struct MachineDeploymentClient {
    client: Client,
    resource: OnceCell<ApiResource>,
}

impl MachineDeploymentClient {
    /// Create a new client; the MachineDeployment version is discovered on first use
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: OnceCell::new(),
        }
    }

    /// Namespaced API for the pool's MachineDeployment
    async fn api(&self, pool: &PoolId) -> Result<Api<DynamicObject>, Error> {
        let ar = self
            .resource
            .get_or_try_init(|| async {
                let timer = CallTimer::start("discover");
                let result = build_api_resource_with_discovery(
                    &self.client,
                    CAPI_GROUP,
                    MACHINE_DEPLOYMENT_KIND,
                )
                .await;
                timer.finish(if result.is_ok() { "ok" } else { "error" });
                result
            })
            .await
            .map_err(|e| match e {
                Error::Kube { source } => {
                    Error::from_control_plane(pool.to_string(), "discover", source)
                }
                other => other,
            })?;
        Ok(Api::namespaced_with(self.client.clone(), &pool.namespace, ar))
    }
}

#[async_trait]
impl PoolClient for MachineDeploymentClient {
    async fn get_pool_state(&self, pool: &PoolId) -> Result<PoolState, Error> {
        let api = self.api(pool).await?;

        let timer = CallTimer::start("get");
        let md = match api.get(&pool.name).await {
            Ok(md) => {
                timer.finish("ok");
                md
            }
            Err(e) => {
                let err = Error::from_control_plane(pool.to_string(), "get", e);
                timer.finish(err.kind_label());
                return Err(err);
            }
        };

        let state = PoolState::from_machine_deployment(pool, &md)?;
        debug!(
            pool = %pool,
            min = ?state.current_min,
            max = ?state.current_max,
            desired = state.current_desired,
            status = %state.status,
            resource_version = ?state.resource_version,
            "Read MachineDeployment state"
        );
        Ok(state)
    }

    async fn update_pool_capacity(
        &self,
        pool: &PoolId,
        target: CapacityTarget,
        expected_resource_version: Option<String>,
    ) -> Result<PoolState, Error> {
        let api = self.api(pool).await?;
        let patch = build_capacity_patch(&target, expected_resource_version.as_deref());
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let timer = CallTimer::start("update");
        let md = match api.patch(&pool.name, &params, &Patch::Merge(&patch)).await {
            Ok(md) => {
                timer.finish("ok");
                md
            }
            Err(e) => {
                let err = Error::from_control_plane(pool.to_string(), "update", e);
                timer.finish(err.kind_label());
                return Err(err);
            }
        };

        let state = PoolState::from_machine_deployment(pool, &md)?;
        info!(
            pool = %pool,
            min = target.min(),
            max = target.max(),
            desired = target.desired(),
            status = %state.status,
            "Patched MachineDeployment capacity"
        );
        Ok(state)
    }
}

/// Build the merge patch for a capacity change.
///
/// A `metadata.resourceVersion` in a merge patch acts as a precondition: the
/// API server answers 409 Conflict if the object moved on since it was read.
fn build_capacity_patch(
    target: &CapacityTarget,
    expected_resource_version: Option<&str>,
) -> serde_json::Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(AUTOSCALER_MIN_SIZE.to_string(), target.min().to_string().into());
    annotations.insert(AUTOSCALER_MAX_SIZE.to_string(), target.max().to_string().into());

    let mut patch = serde_json::json!({
        "metadata": { "annotations": annotations },
        "spec": { "replicas": target.desired() },
    });
    if let Some(rv) = expected_resource_version {
        patch["metadata"]["resourceVersion"] = serde_json::Value::String(rv.to_string());
    }
    patch
}
