//! Error types for dirtax-builder

use crate::services::ServiceError;
use thiserror::Error;

/// Stage-level error
#[derive(Debug, Error)]
pub enum BuildError {
    /// Remote call failed after the retry policy gave up
    #[error("{operation} failed: {source}")]
    Service {
        operation: String,
        #[source]
        source: ServiceError,
    },

    /// dirtax-common error (I/O, JSON, config, integrity)
    #[error(transparent)]
    Common(#[from] dirtax_common::Error),
}

impl BuildError {
    pub fn service(operation: impl Into<String>, source: ServiceError) -> Self {
        BuildError::Service {
            operation: operation.into(),
            source,
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        BuildError::Common(dirtax_common::Error::Integrity(message.into()))
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
