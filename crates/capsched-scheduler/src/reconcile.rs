//! Capacity reconciliation
//!
//! One call to [`CapacityScheduler::reconcile`] is one invocation of a
//! schedule: read the pool, decide, issue at most one update, emit exactly
//! one result. Nothing is remembered between invocations; the pool's own
//! status and resource version are the only coordination between concurrent
//! or repeated invocations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use capsched_capi::{PoolClient, PoolId, PoolStatus};
use capsched_common::metrics::ReconcileTimer;
use capsched_common::Error;

use crate::profile::CapacityProfile;
use crate::result::{Outcome, ReconciliationResult};
use crate::sink::ResultSink;

/// Applies capacity profiles to pools
pub struct CapacityScheduler {
    client: Arc<dyn PoolClient>,
    sink: Arc<dyn ResultSink>,
    call_timeout: Duration,
}

impl CapacityScheduler {
    /// Create a scheduler.
    ///
    /// `call_timeout` bounds every control plane call and the result emission.
    pub fn new(
        client: Arc<dyn PoolClient>,
        sink: Arc<dyn ResultSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            sink,
            call_timeout,
        }
    }

    /// Reconcile a pool toward a profile.
    ///
    /// Returns `Ok` for every outcome the invoker should not retry: applied,
    /// both skips, and a control plane rejection (as a `Failed` result).
    /// Returns `Err` for an unknown pool and for transient failures; the
    /// result is still emitted as `Failed` before the error is returned.
    #[instrument(
        skip(self, profile),
        fields(pool = %profile.pool, schedule = %profile.schedule, target = %profile.target)
    )]
    pub async fn reconcile(
        &self,
        profile: &CapacityProfile,
    ) -> Result<ReconciliationResult, Error> {
        let timer = ReconcileTimer::start(profile.pool.to_string());
        let (result, error) = self.decide(profile).await;

        self.emit(&result).await;
        timer.finish(result.outcome.label());

        match error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    async fn decide(&self, profile: &CapacityProfile) -> (ReconciliationResult, Option<Error>) {
        let pool = &profile.pool;

        let observed = match self
            .bounded(pool, "get", self.client.get_pool_state(pool))
            .await
        {
            Ok(state) => state,
            Err(e) => {
                return (
                    ReconciliationResult::failed(profile, None, e.to_string()),
                    Some(e),
                )
            }
        };

        if observed.status == PoolStatus::Updating {
            info!(
                pool = %pool,
                resource_version = ?observed.resource_version,
                "Pool is updating, leaving it alone"
            );
            return (
                ReconciliationResult::new(profile, Some(observed), Outcome::SkippedBusy),
                None,
            );
        }

        if observed.matches(&profile.target) {
            debug!(pool = %pool, "Pool already at requested capacity");
            return (
                ReconciliationResult::new(profile, Some(observed), Outcome::SkippedAlreadyMatched),
                None,
            );
        }

        if observed.status != PoolStatus::Active {
            warn!(
                pool = %pool,
                status = %observed.status,
                "Requesting capacity change on a pool that is not healthy"
            );
        }

        let update = self.client.update_pool_capacity(
            pool,
            profile.target,
            observed.resource_version.clone(),
        );
        match self.bounded(pool, "update", update).await {
            Ok(acknowledged) => {
                debug!(
                    pool = %pool,
                    status = %acknowledged.status,
                    resource_version = ?acknowledged.resource_version,
                    "Control plane acknowledged capacity change"
                );
                (
                    ReconciliationResult::new(profile, Some(observed), Outcome::Applied),
                    None,
                )
            }
            Err(e @ Error::RejectedByControlPlane { .. }) => (
                ReconciliationResult::failed(profile, Some(observed), e.to_string()),
                None,
            ),
            Err(e) => (
                ReconciliationResult::failed(profile, Some(observed), e.to_string()),
                Some(e),
            ),
        }
    }

    /// Run a control plane call under the call timeout
    async fn bounded<T>(
        &self,
        pool: &PoolId,
        operation: &'static str,
        call: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient(
                pool.to_string(),
                operation,
                format!("no response within {}s", self.call_timeout.as_secs_f64()),
            )),
        }
    }

    async fn emit(&self, result: &ReconciliationResult) {
        match timeout(self.call_timeout, self.sink.emit(result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                error = %e,
                outcome = %result.outcome,
                "Failed to emit reconciliation result"
            ),
            Err(_) => warn!(
                outcome = %result.outcome,
                timeout_secs = self.call_timeout.as_secs_f64(),
                "Timed out emitting reconciliation result"
            ),
        }
    }
}
