//! Pool configuration.

use std::time::Duration;

use mycat_client::Config;

use crate::error::PoolError;

/// Sizing and lifecycle of one session pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Sessions kept open even when idle.
    pub min_sessions: u32,

    /// Upper bound on sessions handed out at once.
    pub max_sessions: u32,

    /// Age after which a session is closed instead of reused.
    pub lifetime: Option<Duration>,

    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,

    /// Ping sessions that sat idle at least this long before handing them
    /// out.
    pub health_check_after: Option<Duration>,

    /// Reset server session state when a session comes back.
    pub reset_on_release: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_sessions: 0,
            max_sessions: 100,
            lifetime: None,
            acquire_timeout: Duration::from_secs(15),
            health_check_after: Some(Duration::from_secs(60)),
            reset_on_release: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizing and lifetime taken from connection settings.
    #[must_use]
    pub fn from_settings(settings: &Config) -> Self {
        Self {
            min_sessions: settings.min_pool_size,
            max_sessions: settings.max_pool_size,
            lifetime: settings.lifetime(),
            acquire_timeout: settings
                .connect_timeout()
                .unwrap_or(Duration::from_secs(15)),
            ..Self::default()
        }
    }

    /// Set the minimum number of sessions.
    #[must_use]
    pub fn min_sessions(mut self, count: u32) -> Self {
        self.min_sessions = count;
        self
    }

    /// Set the maximum number of sessions.
    #[must_use]
    pub fn max_sessions(mut self, count: u32) -> Self {
        self.max_sessions = count;
        self
    }

    /// Set the session lifetime.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle time after which sessions are pinged on checkout.
    #[must_use]
    pub fn health_check_after(mut self, idle: Option<Duration>) -> Self {
        self.health_check_after = idle;
        self
    }

    /// Enable or disable the session reset on release.
    #[must_use]
    pub fn reset_on_release(mut self, enabled: bool) -> Self {
        self.reset_on_release = enabled;
        self
    }

    /// Check sizing.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_sessions == 0 {
            return Err(PoolError::Config("max pool size must be at least 1".into()));
        }
        if self.min_sessions > self.max_sessions {
            return Err(PoolError::Config(format!(
                "min pool size {} exceeds max pool size {}",
                self.min_sessions, self.max_sessions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = Config::new()
            .pool_size(2, 8)
            .connection_lifetime(60)
            .connection_timeout(3);
        let config = PoolConfig::from_settings(&settings);
        assert_eq!(config.min_sessions, 2);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.lifetime, Some(Duration::from_secs(60)));
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert!(config.reset_on_release);
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::new().validate().is_ok());
        assert!(PoolConfig::new().max_sessions(0).validate().is_err());
        assert!(
            PoolConfig::new()
                .min_sessions(5)
                .max_sessions(2)
                .validate()
                .is_err()
        );
    }
}
