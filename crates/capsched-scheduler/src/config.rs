//! Static scheduler configuration
//!
//! Loaded once from YAML at process start, validated, and handed to the
//! scheduler as an immutable value. Example:
//!
//! ```yaml
//! pool:
//!   namespace: capi-prod
//!   cluster: prod
//!   workerPool: general
//! profiles:
//!   up:   { minSize: 2, maxSize: 10, desiredSize: 6 }
//!   down: { minSize: 0, maxSize: 10, desiredSize: 0 }
//! callTimeoutSeconds: 10
//! schedules:
//!   up: "0 7 * * 1-5"
//!   down: "0 19 * * 1-5"
//!   timeZone: Europe/Berlin
//! ```

use std::path::Path;
use std::time::Duration;

use capsched_capi::{CapacityTarget, PoolId};
use capsched_common::Error;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::{CapacityProfile, Schedule};

/// Default per-call timeout against the control plane
pub const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 10;
/// Upper bound on the per-call timeout
pub const MAX_CALL_TIMEOUT_SECONDS: u64 = 300;
/// Time zone used when the config names none
pub const DEFAULT_TIME_ZONE: &str = "Etc/UTC";

fn default_call_timeout_seconds() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECONDS
}

fn default_true() -> bool {
    true
}

/// Top-level configuration file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Which MachineDeployment to manage
    pub pool: PoolSelector,
    /// Capacity for each schedule
    pub profiles: Profiles,
    /// Timeout applied to every control plane call and to result emission
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Cron wiring for the two schedules
    pub schedules: Schedules,
    /// Record a Kubernetes Event on the pool for every invocation
    #[serde(default = "default_true")]
    pub emit_events: bool,
}

/// Selects the pool either directly or through the worker-pool naming convention
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PoolSelector {
    /// Namespace holding the MachineDeployment
    pub namespace: String,
    /// Explicit MachineDeployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_deployment: Option<String>,
    /// Cluster name, combined with `worker_pool`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Worker pool name, combined with `cluster`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pool: Option<String>,
}

impl PoolSelector {
    /// Resolve to the MachineDeployment this selector names
    pub fn resolve(&self) -> Result<PoolId, Error> {
        match (
            &self.machine_deployment,
            &self.cluster,
            &self.worker_pool,
        ) {
            (Some(name), None, None) => PoolId::new(&self.namespace, name),
            (None, Some(cluster), Some(worker_pool)) => {
                PoolId::for_worker_pool(&self.namespace, cluster, worker_pool)
            }
            (Some(_), _, _) => Err(Error::validation_for_field(
                "config",
                "pool",
                "set either machineDeployment or cluster+workerPool, not both",
            )),
            _ => Err(Error::validation_for_field(
                "config",
                "pool",
                "machineDeployment, or both cluster and workerPool, are required",
            )),
        }
    }
}

/// The up and down capacity tuples
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profiles {
    /// Capacity applied when the up schedule fires
    pub up: CapacityTarget,
    /// Capacity applied when the down schedule fires
    pub down: CapacityTarget,
}

/// Cron expressions driving the external trigger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Schedules {
    /// Five-field cron expression for the up schedule
    pub up: String,
    /// Five-field cron expression for the down schedule
    pub down: String,
    /// IANA time zone the expressions are evaluated in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl Schedules {
    /// Cron expression for a schedule
    pub fn expression(&self, schedule: Schedule) -> &str {
        match schedule {
            Schedule::Up => &self.up,
            Schedule::Down => &self.down,
        }
    }

    /// Time zone the expressions are evaluated in
    pub fn time_zone(&self) -> &str {
        self.time_zone.as_deref().unwrap_or(DEFAULT_TIME_ZONE)
    }
}

impl SchedulerConfig {
    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::load_with_source(path).map(|(config, _)| config)
    }

    /// Like [`SchedulerConfig::load`], also returning the file text as read
    pub fn load_with_source(path: &Path) -> Result<(Self, String), Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config_at(
                path.display().to_string(),
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let config = serde_yaml::from_str::<Self>(&content).map_err(|e| {
            Error::config_at(
                path.display().to_string(),
                format!("failed to parse {}: {}", path.display(), e),
            )
        })?;
        config.validate()?;
        debug!(path = %path.display(), pool = ?config.pool, "Loaded scheduler configuration");
        Ok((config, content))
    }

    /// Check everything serde cannot express
    pub fn validate(&self) -> Result<(), Error> {
        self.pool.resolve()?;

        if !(1..=MAX_CALL_TIMEOUT_SECONDS).contains(&self.call_timeout_seconds) {
            return Err(Error::validation_for_field(
                "config",
                "callTimeoutSeconds",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_CALL_TIMEOUT_SECONDS, self.call_timeout_seconds
                ),
            ));
        }

        for schedule in Schedule::ALL {
            validate_cron(schedule, self.schedules.expression(schedule))?;
        }
        if self.schedules.up.split_whitespace().eq(self.schedules.down.split_whitespace()) {
            return Err(Error::validation_for_field(
                "config",
                "schedules",
                "up and down schedules must not fire at the same time",
            ));
        }

        if let Some(tz) = &self.schedules.time_zone {
            if tz.is_empty() || tz.contains(char::is_whitespace) {
                return Err(Error::validation_for_field(
                    "config",
                    "schedules.timeZone",
                    format!("'{}' is not an IANA time zone name", tz),
                ));
            }
        }

        Ok(())
    }

    /// The pool every profile targets
    pub fn pool_id(&self) -> Result<PoolId, Error> {
        self.pool.resolve()
    }

    /// Build the profile for a schedule
    pub fn profile_for(&self, schedule: Schedule) -> Result<CapacityProfile, Error> {
        let target = match schedule {
            Schedule::Up => self.profiles.up,
            Schedule::Down => self.profiles.down,
        };
        Ok(CapacityProfile::new(schedule, self.pool_id()?, target))
    }

    /// Per-call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

/// Shallow five-field cron check; the CronJob controller does the full parse.
fn validate_cron(schedule: Schedule, expr: &str) -> Result<(), Error> {
    let field = format!("schedules.{}", schedule);
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::validation_for_field(
            "config",
            field,
            format!(
                "'{}' must have 5 fields (minute hour day-of-month month day-of-week), found {}",
                expr,
                fields.len()
            ),
        ));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?');
    if let Some(bad) = fields.iter().find(|f| !f.chars().all(allowed)) {
        return Err(Error::validation_for_field(
            "config",
            field,
            format!("'{}' contains an invalid cron field '{}'", expr, bad),
        ));
    }
    Ok(())
}
