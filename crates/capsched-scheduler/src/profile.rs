//! Capacity profiles and the schedules that select them

use std::fmt;
use std::str::FromStr;

use capsched_capi::{CapacityTarget, PoolId};
use capsched_common::Error;
use serde::{Deserialize, Serialize};

/// Which of the two cron schedules fired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// Working-hours capacity
    Up,
    /// Off-hours capacity
    Down,
}

impl Schedule {
    /// Both schedules, in manifest order
    pub const ALL: [Schedule; 2] = [Schedule::Up, Schedule::Down];

    /// Lowercase name used in CLI arguments, labels and resource names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(Error::validation(
                "schedule",
                format!("unknown schedule '{}', expected 'up' or 'down'", other),
            )),
        }
    }
}

/// The capacity one schedule asks for on one pool.
///
/// Built once from configuration at process start and never mutated. The
/// bound ordering is carried by [`CapacityTarget`], so a profile that would
/// ask for `min > desired` or `desired > max` cannot exist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProfile {
    /// Schedule this profile belongs to
    pub schedule: Schedule,
    /// Pool the profile targets
    pub pool: PoolId,
    /// Requested capacity tuple
    #[serde(flatten)]
    pub target: CapacityTarget,
}

impl CapacityProfile {
    /// Create a profile for a pool
    pub fn new(schedule: Schedule, pool: PoolId, target: CapacityTarget) -> Self {
        Self {
            schedule,
            pool,
            target,
        }
    }
}

impl fmt::Display for CapacityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.schedule, self.pool, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("up", Schedule::Up)]
    #[case("Down", Schedule::Down)]
    #[case(" DOWN ", Schedule::Down)]
    fn parses_schedule_names(#[case] input: &str, #[case] expected: Schedule) {
        assert_eq!(input.parse::<Schedule>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_schedule() {
        let err = "sideways".parse::<Schedule>().unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn profile_serializes_flat_tuple() {
        let profile = CapacityProfile::new(
            Schedule::Down,
            PoolId::new("capi-prod", "prod-pool-general").unwrap(),
            CapacityTarget::new(0, 10, 0).unwrap(),
        );
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["schedule"], "down");
        assert_eq!(json["pool"]["name"], "prod-pool-general");
        assert_eq!(json["minSize"], 0);
        assert_eq!(json["maxSize"], 10);
        assert_eq!(json["desiredSize"], 0);
    }
}
