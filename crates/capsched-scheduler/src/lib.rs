//! Time-triggered capacity scheduling for Cluster API worker pools
//!
//! Two cron schedules ("up" and "down") each select a capacity profile. On
//! every fire the [`CapacityScheduler`] reads the pool, skips it when it is
//! busy or already at the requested capacity, and otherwise requests the new
//! `(min, max, desired)` tuple exactly once, conditioned on the version it
//! read. The outcome goes to a [`ResultSink`].
//!
//! - [`profile`] - schedules and capacity profiles
//! - [`config`] - YAML configuration
//! - [`reconcile`] - the reconciliation itself
//! - [`result`] - reconciliation outcomes
//! - [`sink`] - logs, metrics and Kubernetes Events for outcomes
//! - [`cronjob`] - CronJob manifests that fire the schedules

#![deny(missing_docs)]

pub mod config;
pub mod cronjob;
pub mod profile;
pub mod reconcile;
pub mod result;
pub mod sink;

pub use config::SchedulerConfig;
pub use cronjob::{
    generate_trigger_manifests, TriggerOptions, EXIT_PERMANENT_FAILURE, EXIT_TRANSIENT_FAILURE,
};
pub use profile::{CapacityProfile, Schedule};
pub use reconcile::CapacityScheduler;
pub use result::{Outcome, ReconciliationResult};
pub use sink::{EventSink, FanOutSink, ResultSink, TracingSink};
