//! Error types for the CLI

use capsched_scheduler::{EXIT_PERMANENT_FAILURE, EXIT_TRANSIENT_FAILURE};

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Capsched(#[from] capsched_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code telling the Job controller whether to retry
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Capsched(e) if e.is_retryable() => EXIT_TRANSIENT_FAILURE,
            _ => EXIT_PERMANENT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transient(
        capsched_common::Error::transient("ns/md", "get", "503"),
        EXIT_TRANSIENT_FAILURE
    )]
    #[case::not_found(
        capsched_common::Error::pool_not_found("ns/md", "gone"),
        EXIT_PERMANENT_FAILURE
    )]
    #[case::rejected(
        capsched_common::Error::rejected("ns/md", "update", 403, "forbidden"),
        EXIT_PERMANENT_FAILURE
    )]
    #[case::bad_config(capsched_common::Error::config("no such file"), EXIT_PERMANENT_FAILURE)]
    fn exit_code_follows_retryability(#[case] err: capsched_common::Error, #[case] code: i32) {
        assert_eq!(Error::from(err).exit_code(), code);
    }

    #[test]
    fn io_errors_are_permanent() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.exit_code(), EXIT_PERMANENT_FAILURE);
    }
}
