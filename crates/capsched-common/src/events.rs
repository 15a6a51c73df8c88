//! Kubernetes Event recording for capacity changes.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that every invocation leaves a trace on the MachineDeployment it acted
//! on, visible via `kubectl describe machinedeployment`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "CapacityApplied")
    /// * `action` - What action was taken (e.g. "Scale")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as the given controller name.
    ///
    /// `instance` is typically the pod name so that events from the up and
    /// down jobs can be told apart.
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// A capacity change was accepted by the control plane
    pub const CAPACITY_APPLIED: &str = "CapacityApplied";
    /// The pool already had the requested capacity
    pub const CAPACITY_ALREADY_MATCHED: &str = "CapacityAlreadyMatched";
    /// The pool was mid-transition, nothing was requested
    pub const POOL_BUSY: &str = "PoolBusy";
    /// The capacity change failed
    pub const CAPACITY_CHANGE_FAILED: &str = "CapacityChangeFailed";
}

/// Well-known event action strings.
pub mod actions {
    /// Capacity change requested
    pub const SCALE: &str = "Scale";
    /// Reconciliation that ended without a change
    pub const RECONCILE: &str = "Reconcile";
}

