//! Pool identity, capacity targets and observed pool state
//!
//! A pool is a Cluster API MachineDeployment. Its capacity tuple lives in two
//! places: `spec.replicas` carries the desired size and the cluster-autoscaler
//! annotations carry the min/max bounds.

use std::fmt;
use std::str::FromStr;

use capsched_common::Error;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Autoscaler annotation holding the pool's minimum size
pub const AUTOSCALER_MIN_SIZE: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";
/// Autoscaler annotation holding the pool's maximum size
pub const AUTOSCALER_MAX_SIZE: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";

/// Get the MachineDeployment name suffix for a worker pool
pub fn pool_resource_suffix(pool_id: &str) -> String {
    format!("pool-{}", pool_id)
}

/// Identifies one MachineDeployment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId {
    /// Namespace holding the CAPI objects
    pub namespace: String,
    /// MachineDeployment name
    pub name: String,
}

impl PoolId {
    /// Create a pool id from namespace and MachineDeployment name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, Error> {
        let id = Self {
            namespace: namespace.into(),
            name: name.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Pool id for a cluster's worker pool, named `{cluster}-pool-{pool}`
    pub fn for_worker_pool(
        namespace: impl Into<String>,
        cluster: &str,
        worker_pool: &str,
    ) -> Result<Self, Error> {
        Self::new(
            namespace,
            format!("{}-{}", cluster, pool_resource_suffix(worker_pool)),
        )
    }

    fn validate(&self) -> Result<(), Error> {
        for (field, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            if value.is_empty() {
                return Err(Error::validation_for_field("pool", field, "must not be empty"));
            }
            if value.len() > 253 {
                return Err(Error::validation_for_field(
                    "pool",
                    field,
                    "must be at most 253 characters",
                ));
            }
            let valid = value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
            if !valid || value.starts_with('-') || value.ends_with('-') {
                return Err(Error::validation_for_field(
                    "pool",
                    field,
                    format!("'{}' is not a valid Kubernetes object name", value),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for PoolId {
    type Err = Error;

    /// Parse `namespace/name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s.split_once('/').ok_or_else(|| {
            Error::validation("pool", format!("'{}' is not of the form namespace/name", s))
        })?;
        Self::new(namespace, name)
    }
}

/// A `(min, max, desired)` capacity tuple with `min <= desired <= max`.
///
/// The only way to obtain one is through [`CapacityTarget::new`] (or
/// deserialization, which goes through it), so a target handed to the
/// control plane can never violate the bound ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCapacityTarget", into = "RawCapacityTarget")]
pub struct CapacityTarget {
    min: u32,
    max: u32,
    desired: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawCapacityTarget {
    min_size: u32,
    max_size: u32,
    desired_size: u32,
}

impl CapacityTarget {
    /// Create a target, rejecting `min > desired` and `desired > max`
    pub fn new(min: u32, max: u32, desired: u32) -> Result<Self, Error> {
        if min > desired {
            return Err(Error::validation_for_field(
                "capacity",
                "minSize",
                format!("minSize ({}) exceeds desiredSize ({})", min, desired),
            ));
        }
        if desired > max {
            return Err(Error::validation_for_field(
                "capacity",
                "desiredSize",
                format!("desiredSize ({}) exceeds maxSize ({})", desired, max),
            ));
        }
        Ok(Self { min, max, desired })
    }

    /// Minimum pool size
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Maximum pool size
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Desired pool size
    pub fn desired(&self) -> u32 {
        self.desired
    }
}

impl TryFrom<RawCapacityTarget> for CapacityTarget {
    type Error = Error;

    fn try_from(raw: RawCapacityTarget) -> Result<Self, Self::Error> {
        Self::new(raw.min_size, raw.max_size, raw.desired_size)
    }
}

impl From<CapacityTarget> for RawCapacityTarget {
    fn from(t: CapacityTarget) -> Self {
        Self {
            min_size: t.min,
            max_size: t.max,
            desired_size: t.desired,
        }
    }
}

impl fmt::Display for CapacityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min={} max={} desired={}",
            self.min, self.max, self.desired
        )
    }
}

/// Lifecycle status of a pool as reported by the control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    /// Converged: every requested replica exists and is ready
    Active,
    /// A change is in flight (desired size not yet observed, or scaling)
    Updating,
    /// Converged on count but some replicas are not ready
    Degraded,
    /// The control plane reports the pool as failed
    Failed,
}

impl PoolStatus {
    /// Label value for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pool read from the control plane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    /// Which pool this snapshot describes
    pub pool: PoolId,
    /// Minimum size, `None` when the pool carries no min annotation
    pub current_min: Option<u32>,
    /// Maximum size, `None` when the pool carries no max annotation
    pub current_max: Option<u32>,
    /// Desired size (`spec.replicas`)
    pub current_desired: u32,
    /// Derived lifecycle status
    pub status: PoolStatus,
    /// Resource version the snapshot was read at, used as an update precondition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Object UID, used to attach events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Served apiVersion of the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl PoolState {
    /// Whether the observed tuple already equals the target
    pub fn matches(&self, target: &CapacityTarget) -> bool {
        self.current_min == Some(target.min())
            && self.current_max == Some(target.max())
            && self.current_desired == target.desired()
    }

    /// Build a snapshot from a MachineDeployment object
    pub fn from_machine_deployment(pool: &PoolId, md: &DynamicObject) -> Result<Self, Error> {
        let spec_replicas = md
            .data
            .get("spec")
            .and_then(|s| s.get("replicas"))
            .and_then(|r| r.as_i64())
            .ok_or_else(|| {
                Error::serialization_for_kind(
                    "MachineDeployment",
                    format!("{} has no spec.replicas", pool),
                )
            })?;
        let current_desired = u32::try_from(spec_replicas).map_err(|_| {
            Error::serialization_for_kind(
                "MachineDeployment",
                format!("{} has out-of-range spec.replicas {}", pool, spec_replicas),
            )
        })?;

        let annotations = md.metadata.annotations.as_ref();
        let bound = |key: &str| -> Option<u32> {
            let raw = annotations?.get(key)?;
            match raw.trim().parse::<u32>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(pool = %pool, annotation = %key, value = %raw, "Ignoring unparseable autoscaler annotation");
                    None
                }
            }
        };

        Ok(Self {
            pool: pool.clone(),
            current_min: bound(AUTOSCALER_MIN_SIZE),
            current_max: bound(AUTOSCALER_MAX_SIZE),
            current_desired,
            status: derive_status(md, spec_replicas),
            resource_version: md.metadata.resource_version.clone(),
            uid: md.metadata.uid.clone(),
            api_version: md.types.as_ref().map(|t| t.api_version.clone()),
        })
    }
}

/// Derive the pool status from MachineDeployment status fields.
///
/// Ordering matters: a failed phase wins, then anything in flight, and only a
/// converged replica count can be judged degraded.
fn derive_status(md: &DynamicObject, spec_replicas: i64) -> PoolStatus {
    let status = md.data.get("status");
    let field_i64 = |name: &str| status.and_then(|s| s.get(name)).and_then(|v| v.as_i64());
    let phase = status
        .and_then(|s| s.get("phase"))
        .and_then(|p| p.as_str());

    if phase == Some("Failed") {
        return PoolStatus::Failed;
    }

    let generation = md.metadata.generation.unwrap_or(0);
    let observed_generation = field_i64("observedGeneration").unwrap_or(0);
    if observed_generation < generation {
        return PoolStatus::Updating;
    }

    if matches!(phase, Some("ScalingUp" | "ScalingDown")) {
        return PoolStatus::Updating;
    }

    let replicas = field_i64("replicas").unwrap_or(0);
    if replicas != spec_replicas {
        return PoolStatus::Updating;
    }

    let ready = field_i64("readyReplicas").unwrap_or(0);
    if ready < replicas {
        return PoolStatus::Degraded;
    }

    PoolStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine_deployment(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).expect("valid MachineDeployment")
    }

    fn md_with(
        generation: i64,
        annotations: serde_json::Value,
        spec_replicas: i64,
        status: serde_json::Value,
    ) -> DynamicObject {
        machine_deployment(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "MachineDeployment",
            "metadata": {
                "name": "prod-pool-general",
                "namespace": "capi-prod",
                "generation": generation,
                "resourceVersion": "4242",
                "uid": "uid-1",
                "annotations": annotations,
            },
            "spec": { "replicas": spec_replicas },
            "status": status,
        }))
    }

    fn pool() -> PoolId {
        PoolId::new("capi-prod", "prod-pool-general").unwrap()
    }

    fn bounds(min: &str, max: &str) -> serde_json::Value {
        let mut annotations = serde_json::Map::new();
        annotations.insert(AUTOSCALER_MIN_SIZE.to_string(), min.into());
        annotations.insert(AUTOSCALER_MAX_SIZE.to_string(), max.into());
        serde_json::Value::Object(annotations)
    }

    #[test]
    fn reads_tuple_from_replicas_and_annotations() {
        let md = md_with(
            3,
            bounds("2", "10"),
            6,
            serde_json::json!({
                "observedGeneration": 3,
                "phase": "Running",
                "replicas": 6,
                "readyReplicas": 6,
            }),
        );
        let state = PoolState::from_machine_deployment(&pool(), &md).unwrap();

        assert_eq!(state.current_min, Some(2));
        assert_eq!(state.current_max, Some(10));
        assert_eq!(state.current_desired, 6);
        assert_eq!(state.status, PoolStatus::Active);
        assert_eq!(state.resource_version.as_deref(), Some("4242"));
        assert_eq!(state.uid.as_deref(), Some("uid-1"));
        assert_eq!(state.api_version.as_deref(), Some("cluster.x-k8s.io/v1beta1"));
    }

    #[rstest]
    #[case::unobserved_generation(4, "Running", 6, 6, PoolStatus::Updating)]
    #[case::scaling_up(3, "ScalingUp", 6, 4, PoolStatus::Updating)]
    #[case::scaling_down(3, "ScalingDown", 6, 6, PoolStatus::Updating)]
    #[case::replica_count_lagging(3, "Running", 4, 4, PoolStatus::Updating)]
    #[case::not_all_ready(3, "Running", 6, 5, PoolStatus::Degraded)]
    #[case::failed(3, "Failed", 6, 0, PoolStatus::Failed)]
    #[case::failed_wins_over_in_flight(9, "Failed", 2, 0, PoolStatus::Failed)]
    #[case::converged(3, "Running", 6, 6, PoolStatus::Active)]
    fn derives_status(
        #[case] generation: i64,
        #[case] phase: &str,
        #[case] status_replicas: i64,
        #[case] ready: i64,
        #[case] expected: PoolStatus,
    ) {
        let md = md_with(
            generation,
            bounds("0", "10"),
            6,
            serde_json::json!({
                "observedGeneration": 3,
                "phase": phase,
                "replicas": status_replicas,
                "readyReplicas": ready,
            }),
        );
        let state = PoolState::from_machine_deployment(&pool(), &md).unwrap();
        assert_eq!(state.status, expected);
    }

    #[test]
    fn missing_status_means_not_yet_observed() {
        let md = machine_deployment(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "MachineDeployment",
            "metadata": { "name": "md", "namespace": "ns", "generation": 1 },
            "spec": { "replicas": 1 },
        }));
        let state = PoolState::from_machine_deployment(&pool(), &md).unwrap();
        assert_eq!(state.status, PoolStatus::Updating);
        assert_eq!(state.current_min, None);
        assert_eq!(state.current_max, None);
    }

    #[test]
    fn unparseable_bounds_are_treated_as_absent() {
        let md = md_with(
            1,
            bounds("two", "10"),
            2,
            serde_json::json!({"observedGeneration": 1, "replicas": 2, "readyReplicas": 2}),
        );
        let state = PoolState::from_machine_deployment(&pool(), &md).unwrap();
        assert_eq!(state.current_min, None);
        assert_eq!(state.current_max, Some(10));
    }

    #[test]
    fn missing_replicas_is_a_serialization_error() {
        let md = machine_deployment(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "MachineDeployment",
            "metadata": { "name": "md", "namespace": "ns" },
            "spec": {},
        }));
        let err = PoolState::from_machine_deployment(&pool(), &md).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn matches_requires_all_three_fields() {
        let md = md_with(
            1,
            bounds("0", "10"),
            0,
            serde_json::json!({"observedGeneration": 1, "replicas": 0, "readyReplicas": 0}),
        );
        let state = PoolState::from_machine_deployment(&pool(), &md).unwrap();

        assert!(state.matches(&CapacityTarget::new(0, 10, 0).unwrap()));
        assert!(!state.matches(&CapacityTarget::new(0, 12, 0).unwrap()));
        assert!(!state.matches(&CapacityTarget::new(0, 10, 1).unwrap()));

        let mut unbounded = state.clone();
        unbounded.current_min = None;
        assert!(!unbounded.matches(&CapacityTarget::new(0, 10, 0).unwrap()));
    }

    #[rstest]
    #[case(3, 10, 2)]
    #[case(0, 5, 6)]
    #[case(5, 4, 5)]
    fn target_rejects_out_of_order_bounds(
        #[case] min: u32,
        #[case] max: u32,
        #[case] desired: u32,
    ) {
        assert!(CapacityTarget::new(min, max, desired).is_err());
    }

    #[test]
    fn target_allows_all_zero() {
        let t = CapacityTarget::new(0, 0, 0).unwrap();
        assert_eq!((t.min(), t.max(), t.desired()), (0, 0, 0));
    }

    #[test]
    fn target_deserialization_enforces_ordering() {
        let ok: CapacityTarget =
            serde_json::from_str(r#"{"minSize":0,"maxSize":10,"desiredSize":0}"#).unwrap();
        assert_eq!(ok, CapacityTarget::new(0, 10, 0).unwrap());

        let bad = serde_json::from_str::<CapacityTarget>(
            r#"{"minSize":3,"maxSize":10,"desiredSize":1}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn pool_id_parses_and_displays() {
        let id: PoolId = "capi-prod/prod-pool-general".parse().unwrap();
        assert_eq!(id.namespace, "capi-prod");
        assert_eq!(id.name, "prod-pool-general");
        assert_eq!(id.to_string(), "capi-prod/prod-pool-general");

        assert!("no-slash".parse::<PoolId>().is_err());
        assert!("ns/Upper".parse::<PoolId>().is_err());
        assert!("/name".parse::<PoolId>().is_err());
    }

    #[test]
    fn worker_pool_naming_follows_cluster_convention() {
        let id = PoolId::for_worker_pool("capi-prod", "prod", "general").unwrap();
        assert_eq!(id.name, "prod-pool-general");
    }
}
