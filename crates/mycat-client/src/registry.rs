//! Parsed settings cache and driver id counter.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;

/// Number of parsed connection strings kept.
pub const DEFAULT_SETTINGS_CAPACITY: usize = 25;

/// Caches parsed connection strings and hands out driver ids.
///
/// Owned by an [`Environment`](crate::Environment); safe to share across
/// tasks.
#[derive(Debug)]
pub struct SettingsRegistry {
    parsed: Mutex<LruCache<String, Config>>,
    next_driver_id: AtomicU64,
}

impl SettingsRegistry {
    /// Create a registry with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SETTINGS_CAPACITY)
    }

    /// Create a registry keeping up to `capacity` parsed strings.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            parsed: Mutex::new(LruCache::new(capacity)),
            next_driver_id: AtomicU64::new(1),
        }
    }

    /// Parse `conn_str`, reusing a previous parse of the identical string.
    pub fn parse(&self, conn_str: &str) -> Result<Config> {
        if let Some(config) = self.parsed.lock().get(conn_str) {
            return Ok(config.clone());
        }
        let config = Config::from_connection_string(conn_str)?;
        self.parsed.lock().put(conn_str.to_string(), config.clone());
        Ok(config)
    }

    /// Number of cached parses.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.parsed.lock().len()
    }

    /// Allocate the next driver id.
    pub fn next_driver_id(&self) -> u64 {
        self.next_driver_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
