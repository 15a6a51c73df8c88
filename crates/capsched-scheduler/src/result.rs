//! Outcome of one reconciliation

use std::fmt;

use capsched_capi::PoolState;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::profile::CapacityProfile;

/// What a reconciliation did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The control plane accepted the new capacity tuple
    Applied,
    /// The pool already had the requested tuple, nothing was sent
    SkippedAlreadyMatched,
    /// The pool was mid-transition, nothing was sent
    SkippedBusy,
    /// The reconciliation failed; see the error detail
    Failed,
}

impl Outcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedAlreadyMatched => "skipped_already_matched",
            Self::SkippedBusy => "skipped_busy",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured record of one invocation, emitted once to the result sink
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    /// Profile the invocation was asked to apply
    pub requested_profile: CapacityProfile,
    /// Pool state read before deciding, absent when the read failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_before: Option<PoolState>,
    /// What happened
    pub outcome: Outcome,
    /// Why it failed, set only for [`Outcome::Failed`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// When the outcome was decided
    pub timestamp: DateTime<Utc>,
}

impl ReconciliationResult {
    /// Successful or skipped outcome
    pub fn new(profile: &CapacityProfile, observed: Option<PoolState>, outcome: Outcome) -> Self {
        Self {
            requested_profile: profile.clone(),
            observed_before: observed,
            outcome,
            error_detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed outcome with the error that caused it
    pub fn failed(
        profile: &CapacityProfile,
        observed: Option<PoolState>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(profile, observed, Outcome::Failed)
        }
    }
}
