//! Pool error types.

use thiserror::Error;

/// Errors returned by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was closed.
    #[error("pool is closed")]
    PoolClosed,

    /// No session became available in time.
    #[error("timed out after {0:?} waiting for a pooled session")]
    Timeout(std::time::Duration),

    /// Invalid pool sizing or lifetime.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// Opening or checking a session failed.
    #[error(transparent)]
    Client(#[from] mycat_client::Error),
}

impl PoolError {
    /// Whether retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Client(e) => e.is_transient(),
            Self::PoolClosed | Self::Config(_) => false,
        }
    }
}

impl From<PoolError> for mycat_client::Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Client(inner) => inner,
            PoolError::Config(msg) => Self::Config(msg),
            other => Self::Pool(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_pass_through() {
        let e: mycat_client::Error =
            PoolError::Client(mycat_client::Error::Timeout { fatal: false }).into();
        assert!(e.is_timeout());

        let e: mycat_client::Error = PoolError::PoolClosed.into();
        assert!(matches!(e, mycat_client::Error::Pool(_)));
        assert!(e.is_transient());
    }

    #[test]
    fn test_transient() {
        assert!(PoolError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!PoolError::PoolClosed.is_transient());
    }
}
