//! Cancellation.
//!
//! Two mechanisms exist. A [`CancellationToken`] passed to a `*_with_cancel`
//! entry point is checked once, before the operation starts; an operation
//! already in flight always runs to completion. A statement already running
//! on the server is stopped by `KILL QUERY` sent over a side connection
//! opened by [`SideChannelFactory`].

pub use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::Connection;
use crate::environment::Environment;
use crate::error::{Error, Result};

/// Fail with [`Error::Cancelled`] if `token` has fired.
pub(crate) fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Opens the unpooled, non-enlisting connections used to kill queries.
#[derive(Debug, Clone)]
pub struct SideChannelFactory {
    env: Environment,
}

impl SideChannelFactory {
    /// Side channels reaching the same servers as `env`.
    #[must_use]
    pub fn new(env: &Environment) -> Self {
        Self {
            env: env.side_channel(),
        }
    }

    /// Settings for a side connection derived from `settings`.
    ///
    /// Pooling and enlistment are off and both timeouts are
    /// `timeout_seconds`.
    #[must_use]
    pub fn narrow(settings: &Config, timeout_seconds: u32) -> Config {
        let mut narrowed = settings.clone();
        narrowed.pooling = false;
        narrowed.auto_enlist = false;
        narrowed.connection_timeout = timeout_seconds;
        narrowed.default_command_timeout = timeout_seconds;
        narrowed.kill_query = true;
        narrowed
    }

    /// Open a side connection for `settings`.
    pub async fn open(&self, settings: &Config, timeout_seconds: u32) -> Result<Connection> {
        let mut connection = self
            .env
            .connection(Self::narrow(settings, timeout_seconds));
        connection.open().await?;
        Ok(connection)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowed_settings() {
        let settings = Config::new()
            .pooling(true)
            .auto_enlist(true)
            .connection_timeout(15)
            .default_command_timeout(30)
            .database("shop");
        let narrowed = SideChannelFactory::narrow(&settings, 5);
        assert!(!narrowed.pooling);
        assert!(!narrowed.auto_enlist);
        assert!(narrowed.is_kill_query());
        assert_eq!(narrowed.connection_timeout, 5);
        assert_eq!(narrowed.default_command_timeout, 5);
        assert_eq!(narrowed.database.as_deref(), Some("shop"));
        assert_ne!(narrowed.equivalence_key(), settings.equivalence_key());
    }

    #[test]
    fn test_check_token() {
        let token = CancellationToken::new();
        assert!(check(&token).is_ok());
        token.cancel();
        assert!(matches!(check(&token), Err(Error::Cancelled)));
    }
}
