//! Error types for the capacity scheduler
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants mirror how a failure must be handled by whoever invoked the
//! scheduler: a missing pool is a wiring bug, a transient control-plane
//! failure is safe to retry, and a rejection will repeat if retried verbatim.

use thiserror::Error;

/// Main error type for capsched operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has not been classified against a pool
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The pool referenced by a profile does not exist in the control plane
    #[error("pool {pool} not found: {message}")]
    PoolNotFound {
        /// Pool identifier (namespace/name)
        pool: String,
        /// Description from the control plane
        message: String,
    },

    /// Network failure, server error, throttling or timeout talking to the control plane
    #[error("transient control plane error during {operation} on {pool}: {message}")]
    TransientControlPlane {
        /// Pool identifier (namespace/name)
        pool: String,
        /// Control plane operation that failed (discover, get, update)
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// The control plane refused a specific request
    #[error("control plane rejected {operation} on {pool} ({code}): {message}")]
    RejectedByControlPlane {
        /// Pool identifier (namespace/name)
        pool: String,
        /// Control plane operation that was rejected
        operation: String,
        /// HTTP status code returned by the API server
        code: u16,
        /// Reason reported by the API server
        message: String,
    },

    /// Validation error for profiles or configuration values
    #[error("validation error for {subject}: {message}")]
    Validation {
        /// What was being validated (profile name, config section)
        subject: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "profiles.up.desiredSize")
        field: Option<String>,
    },

    /// Configuration file could not be read or parsed
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
        /// Path of the configuration file (if known)
        path: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "discovery", "sink")
        context: String,
    },
}

impl Error {
    /// Create a pool-not-found error
    pub fn pool_not_found(pool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PoolNotFound {
            pool: pool.into(),
            message: msg.into(),
        }
    }

    /// Create a transient control plane error
    pub fn transient(
        pool: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::TransientControlPlane {
            pool: pool.into(),
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a rejection error carrying the API server status code
    pub fn rejected(
        pool: impl Into<String>,
        operation: impl Into<String>,
        code: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::RejectedByControlPlane {
            pool: pool.into(),
            operation: operation.into(),
            code,
            message: msg.into(),
        }
    }

    /// Create a validation error without a field path
    pub fn validation(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(
        subject: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: None,
        }
    }

    /// Create a configuration error for a specific file
    pub fn config_at(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: Some(path.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube-rs error raised while operating on a pool.
    ///
    /// 404 means the pool is unknown. 429 and 5xx are the API server asking us
    /// to come back later. Every other API status is a refusal of this request.
    /// Anything that never produced an API status (connect, TLS, body read)
    /// is a transport failure and therefore transient.
    pub fn from_control_plane(
        pool: impl Into<String>,
        operation: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        let pool = pool.into();
        let operation = operation.into();
        match source {
            kube::Error::Api(ae) if ae.code == 404 => Self::PoolNotFound {
                pool,
                message: ae.message,
            },
            kube::Error::Api(ae) if ae.code == 429 || ae.code >= 500 => {
                Self::TransientControlPlane {
                    pool,
                    operation,
                    message: format!("{} ({})", ae.message, ae.code),
                }
            }
            kube::Error::Api(ae) => Self::RejectedByControlPlane {
                pool,
                operation,
                code: ae.code,
                message: if ae.reason.is_empty() {
                    ae.message
                } else {
                    format!("{}: {}", ae.reason, ae.message)
                },
            },
            kube::Error::SerdeError(e) => Self::Serialization {
                message: e.to_string(),
                kind: Some("MachineDeployment".to_string()),
            },
            other => Self::TransientControlPlane {
                pool,
                operation,
                message: other.to_string(),
            },
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transient control plane failures (and unclassified transport-level
    /// kube errors) are retryable. Everything else needs a config or code fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 429
            ),
            Error::TransientControlPlane { .. } => true,
            Error::PoolNotFound { .. } => false,
            Error::RejectedByControlPlane { .. } => false,
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => false,
        }
    }

    /// Short label for metrics and event reasons
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::PoolNotFound { .. } => "pool_not_found",
            Error::TransientControlPlane { .. } => "transient",
            Error::RejectedByControlPlane { .. } => "rejected",
            Error::Validation { .. } => "validation",
            Error::Config { .. } => "config",
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
        }
    }
}
