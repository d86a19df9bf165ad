//! Error types for the host pool

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by connection factories and connections
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a collaborator error, kept cheap to clone
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is exhausted - no connection available")]
    PoolExhausted,

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Connection validation failed after {attempts} attempts")]
    ValidationFailed { attempts: usize },

    #[error("Connection factory failed: {0}")]
    Factory(#[source] SharedError),

    #[error("Unable to refresh known hosts: {0}")]
    Topology(#[source] SharedError),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unable to start eviction thread: {0}")]
    Scheduler(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn factory(err: BoxError) -> Self {
        PoolError::Factory(Arc::from(err))
    }

    pub(crate) fn topology(err: BoxError) -> Self {
        PoolError::Topology(Arc::from(err))
    }

    /// Whether a caller may reasonably retry the operation later or route it
    /// to another host.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PoolError::PoolClosed | PoolError::InvalidConfiguration(_)
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_error_keeps_source() {
        let err = PoolError::factory("connection refused".into());
        assert_eq!(err.to_string(), "Connection factory failed: connection refused");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_recoverable() {
        assert!(PoolError::PoolExhausted.is_recoverable());
        assert!(!PoolError::PoolClosed.is_recoverable());
    }
}
