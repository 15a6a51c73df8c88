//! In-memory control plane and sinks for scenario tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use capsched_capi::{CapacityTarget, PoolClient, PoolId, PoolState, PoolStatus};
use capsched_common::Error;
use capsched_scheduler::{ReconciliationResult, ResultSink};

#[derive(Clone, Debug)]
struct FakePool {
    min: Option<u32>,
    max: Option<u32>,
    desired: u32,
    status: PoolStatus,
    version: u64,
}

/// A control plane that behaves like the API server for one kind:
/// versioned objects, conflict on a stale precondition, and an UPDATING
/// phase after every accepted change until [`FakeControlPlane::settle`].
#[derive(Default)]
pub struct FakeControlPlane {
    pools: Mutex<HashMap<PoolId, FakePool>>,
    gets: AtomicUsize,
    updates: AtomicUsize,
    accepted: Mutex<Vec<(PoolId, CapacityTarget)>>,
    hang: AtomicBool,
    yield_after_read: AtomicBool,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_pool(&self, pool: &PoolId, min: u32, max: u32, desired: u32, status: PoolStatus) {
        self.pools.lock().unwrap().insert(
            pool.clone(),
            FakePool {
                min: Some(min),
                max: Some(max),
                desired,
                status,
                version: 1,
            },
        );
    }

    /// Finish whatever transition is in flight
    pub fn settle(&self, pool: &PoolId) {
        if let Some(p) = self.pools.lock().unwrap().get_mut(pool) {
            p.status = PoolStatus::Active;
            p.version += 1;
        }
    }

    /// Every call from now on never answers
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Give other tasks a turn between reading a pool and returning it
    pub fn yield_after_read(&self) {
        self.yield_after_read.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<(PoolId, CapacityTarget)> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn current(&self, pool: &PoolId) -> Option<(u32, u32, u32, PoolStatus)> {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .map(|p| (p.min.unwrap_or(0), p.max.unwrap_or(0), p.desired, p.status))
    }

    fn snapshot(pool: &PoolId, p: &FakePool) -> PoolState {
        PoolState {
            pool: pool.clone(),
            current_min: p.min,
            current_max: p.max,
            current_desired: p.desired,
            status: p.status,
            resource_version: Some(p.version.to_string()),
            uid: Some(format!("uid-{}", pool.name)),
            api_version: Some("cluster.x-k8s.io/v1beta1".to_string()),
        }
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl PoolClient for FakeControlPlane {
    async fn get_pool_state(&self, pool: &PoolId) -> Result<PoolState, Error> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;

        let state = {
            let pools = self.pools.lock().unwrap();
            let p = pools.get(pool).ok_or_else(|| {
                Error::pool_not_found(
                    pool.to_string(),
                    format!("machinedeployments \"{}\" not found", pool.name),
                )
            })?;
            Self::snapshot(pool, p)
        };

        if self.yield_after_read.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(state)
    }

    async fn update_pool_capacity(
        &self,
        pool: &PoolId,
        target: CapacityTarget,
        expected_resource_version: Option<String>,
    ) -> Result<PoolState, Error> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;

        let mut pools = self.pools.lock().unwrap();
        let p = pools.get_mut(pool).ok_or_else(|| {
            Error::pool_not_found(pool.to_string(), "gone before update")
        })?;

        if let Some(expected) = expected_resource_version {
            if expected != p.version.to_string() {
                return Err(Error::rejected(
                    pool.to_string(),
                    "update",
                    409,
                    "Conflict: the object has been modified; please apply your changes to the latest version",
                ));
            }
        }

        p.min = Some(target.min());
        p.max = Some(target.max());
        p.desired = target.desired();
        p.status = PoolStatus::Updating;
        p.version += 1;
        self.accepted.lock().unwrap().push((pool.clone(), target));
        Ok(Self::snapshot(pool, p))
    }
}

/// Keeps every emitted result
#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<ReconciliationResult>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn results(&self) -> Vec<ReconciliationResult> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn emit(&self, result: &ReconciliationResult) -> Result<(), Error> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

/// A sink whose backend is down
pub struct UnreachableSink;

#[async_trait]
impl ResultSink for UnreachableSink {
    async fn emit(&self, _result: &ReconciliationResult) -> Result<(), Error> {
        Err(Error::internal_with_context(
            "sink",
            "connection refused (collector:4317)",
        ))
    }
}

/// A sink that never answers
pub struct StalledSink;

#[async_trait]
impl ResultSink for StalledSink {
    async fn emit(&self, _result: &ReconciliationResult) -> Result<(), Error> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
