//! Common types for capsched: errors, telemetry, metrics, events and kube utilities

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager / reporting controller name used for every write
pub const FIELD_MANAGER: &str = "capsched";

/// Label key marking resources created by capsched
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_CAPSCHED: &str = "capsched";
