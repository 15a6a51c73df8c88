//! Result sinks
//!
//! Every reconciliation emits exactly one [`ReconciliationResult`]. Sinks turn
//! it into something an operator can see: structured logs and metrics, and a
//! Kubernetes Event on the MachineDeployment. A sink failure never changes
//! the outcome of the reconciliation that produced the result.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use capsched_capi::MACHINE_DEPLOYMENT_KIND;
use capsched_common::events::{actions, reasons, EventPublisher};
use capsched_common::metrics;
use capsched_common::Error;

use crate::result::{Outcome, ReconciliationResult};

/// Destination for reconciliation results
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one result
    async fn emit(&self, result: &ReconciliationResult) -> Result<(), Error>;
}

/// Structured log line plus OpenTelemetry metrics
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl ResultSink for TracingSink {
    async fn emit(&self, result: &ReconciliationResult) -> Result<(), Error> {
        let profile = &result.requested_profile;
        let pool = profile.pool.to_string();
        let before = result.observed_before.as_ref();

        metrics::record_reconciliation(&pool, profile.schedule.as_str(), result.outcome.label());
        if result.outcome == Outcome::Applied {
            metrics::set_requested_desired(&pool, profile.target.desired());
        }

        match result.outcome {
            Outcome::Failed => error!(
                pool = %pool,
                schedule = %profile.schedule,
                outcome = %result.outcome,
                target = %profile.target,
                observed_status = ?before.map(|s| s.status),
                error = result.error_detail.as_deref().unwrap_or_default(),
                "Capacity reconciliation failed"
            ),
            Outcome::SkippedBusy => warn!(
                pool = %pool,
                schedule = %profile.schedule,
                outcome = %result.outcome,
                target = %profile.target,
                "Pool is mid-transition, capacity change skipped"
            ),
            _ => info!(
                pool = %pool,
                schedule = %profile.schedule,
                outcome = %result.outcome,
                target = %profile.target,
                observed_min = ?before.and_then(|s| s.current_min),
                observed_max = ?before.and_then(|s| s.current_max),
                observed_desired = ?before.map(|s| s.current_desired),
                "Capacity reconciliation finished"
            ),
        }
        Ok(())
    }
}

/// Records a Kubernetes Event on the pool's MachineDeployment
pub struct EventSink {
    publisher: Arc<dyn EventPublisher>,
}

impl EventSink {
    /// Wrap an event publisher
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl ResultSink for EventSink {
    async fn emit(&self, result: &ReconciliationResult) -> Result<(), Error> {
        let Some(object_ref) = object_reference(result) else {
            debug!(
                pool = %result.requested_profile.pool,
                "Pool was never observed, no object to attach an event to"
            );
            return Ok(());
        };

        let profile = &result.requested_profile;
        let (type_, reason, action) = match result.outcome {
            Outcome::Applied => (EventType::Normal, reasons::CAPACITY_APPLIED, actions::SCALE),
            Outcome::SkippedAlreadyMatched => (
                EventType::Normal,
                reasons::CAPACITY_ALREADY_MATCHED,
                actions::RECONCILE,
            ),
            Outcome::SkippedBusy => (EventType::Normal, reasons::POOL_BUSY, actions::RECONCILE),
            Outcome::Failed => (
                EventType::Warning,
                reasons::CAPACITY_CHANGE_FAILED,
                actions::SCALE,
            ),
        };

        let mut note = format!("{} schedule requested {}", profile.schedule, profile.target);
        if let Some(detail) = &result.error_detail {
            note.push_str(": ");
            note.push_str(detail);
        }

        self.publisher
            .publish(&object_ref, type_, reason, action, Some(note))
            .await;
        Ok(())
    }
}

/// Reference to the observed MachineDeployment, if it was observed at all
fn object_reference(result: &ReconciliationResult) -> Option<ObjectReference> {
    let observed = result.observed_before.as_ref()?;
    Some(ObjectReference {
        api_version: observed.api_version.clone(),
        kind: Some(MACHINE_DEPLOYMENT_KIND.to_string()),
        name: Some(observed.pool.name.clone()),
        namespace: Some(observed.pool.namespace.clone()),
        uid: observed.uid.clone(),
        resource_version: observed.resource_version.clone(),
        ..Default::default()
    })
}

/// Delivers to every inner sink, even when an earlier one fails
pub struct FanOutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanOutSink {
    /// Create a fan-out over the given sinks
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for FanOutSink {
    async fn emit(&self, result: &ReconciliationResult) -> Result<(), Error> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.emit(result).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::internal_with_context("sink", failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CapacityProfile, Schedule};
    use capsched_capi::{CapacityTarget, PoolId, PoolState, PoolStatus};
    use mockall::mock;

    mock! {
        pub Publisher {}

        #[async_trait::async_trait]
        impl EventPublisher for Publisher {
            async fn publish(
                &self,
                resource_ref: &ObjectReference,
                type_: EventType,
                reason: &str,
                action: &str,
                note: Option<String>,
            );
        }
    }

    fn pool() -> PoolId {
        PoolId::new("capi-prod", "prod-pool-general").unwrap()
    }

    fn profile() -> CapacityProfile {
        CapacityProfile::new(Schedule::Down, pool(), CapacityTarget::new(0, 10, 0).unwrap())
    }

    fn observed() -> PoolState {
        PoolState {
            pool: pool(),
            current_min: Some(2),
            current_max: Some(10),
            current_desired: 6,
            status: PoolStatus::Active,
            resource_version: Some("4242".to_string()),
            uid: Some("uid-1".to_string()),
            api_version: Some("cluster.x-k8s.io/v1beta1".to_string()),
        }
    }

    #[tokio::test]
    async fn tracing_sink_always_succeeds() {
        let sink = TracingSink;
        for outcome in [
            Outcome::Applied,
            Outcome::SkippedAlreadyMatched,
            Outcome::SkippedBusy,
        ] {
            let result = ReconciliationResult::new(&profile(), Some(observed()), outcome);
            sink.emit(&result).await.unwrap();
        }
        let failed = ReconciliationResult::failed(&profile(), None, "boom");
        sink.emit(&failed).await.unwrap();
    }

    #[tokio::test]
    async fn event_sink_attaches_event_to_observed_machine_deployment() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|r, t, reason, action, note| {
                r.uid.as_deref() == Some("uid-1")
                    && r.kind.as_deref() == Some("MachineDeployment")
                    && r.name.as_deref() == Some("prod-pool-general")
                    && *t == EventType::Normal
                    && reason == reasons::CAPACITY_APPLIED
                    && action == actions::SCALE
                    && note.as_deref().is_some_and(|n| n.contains("desired=0"))
            })
            .times(1)
            .return_const(());

        let sink = EventSink::new(Arc::new(publisher));
        let result = ReconciliationResult::new(&profile(), Some(observed()), Outcome::Applied);
        sink.emit(&result).await.unwrap();
    }

    #[tokio::test]
    async fn event_sink_warns_on_failure_with_detail() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, t, reason, _, note| {
                *t == EventType::Warning
                    && reason == reasons::CAPACITY_CHANGE_FAILED
                    && note.as_deref().is_some_and(|n| n.ends_with("conflict"))
            })
            .times(1)
            .return_const(());

        let sink = EventSink::new(Arc::new(publisher));
        let result = ReconciliationResult::failed(&profile(), Some(observed()), "conflict");
        sink.emit(&result).await.unwrap();
    }

    #[rstest::rstest]
    #[case::applied(Outcome::Applied, reasons::CAPACITY_APPLIED, actions::SCALE)]
    #[case::matched(
        Outcome::SkippedAlreadyMatched,
        reasons::CAPACITY_ALREADY_MATCHED,
        actions::RECONCILE
    )]
    #[case::busy(Outcome::SkippedBusy, reasons::POOL_BUSY, actions::RECONCILE)]
    #[tokio::test]
    async fn event_sink_maps_outcome_to_normal_event(
        #[case] outcome: Outcome,
        #[case] expected_reason: &'static str,
        #[case] expected_action: &'static str,
    ) {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(move |_, t, reason, action, _| {
                *t == EventType::Normal && reason == expected_reason && action == expected_action
            })
            .times(1)
            .return_const(());

        let sink = EventSink::new(Arc::new(publisher));
        let result = ReconciliationResult::new(&profile(), Some(observed()), outcome);
        sink.emit(&result).await.unwrap();
    }

    #[tokio::test]
    async fn event_sink_skips_unobserved_pool() {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let sink = EventSink::new(Arc::new(publisher));
        let result = ReconciliationResult::failed(&profile(), None, "pool not found");
        sink.emit(&result).await.unwrap();
    }

    #[tokio::test]
    async fn fan_out_reaches_every_sink_and_reports_failures() {
        let mut broken = MockResultSink::new();
        broken
            .expect_emit()
            .times(1)
            .returning(|_| Err(Error::internal_with_context("sink", "collector down")));
        let mut healthy = MockResultSink::new();
        healthy.expect_emit().times(1).returning(|_| Ok(()));

        let sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(broken), Arc::new(healthy)];
        let sink = FanOutSink::new(sinks);
        let result = ReconciliationResult::new(&profile(), Some(observed()), Outcome::Applied);
        let err = sink.emit(&result).await.unwrap_err();
        assert!(err.to_string().contains("collector down"));
    }
}
