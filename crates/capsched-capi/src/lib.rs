//! Cluster API binding for capacity scheduling
//!
//! - [`pool`] - pool identity, capacity targets and observed pool state
//! - [`client`] - the [`PoolClient`] trait and its MachineDeployment implementation

#![deny(missing_docs)]

pub mod client;
pub mod pool;

pub use client::{MachineDeploymentClient, PoolClient, CAPI_GROUP, MACHINE_DEPLOYMENT_KIND};
pub use pool::{CapacityTarget, PoolId, PoolState, PoolStatus};
