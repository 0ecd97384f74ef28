//! # mycat-driver-pool
//!
//! Session pool for the mycat MySQL driver.
//!
//! [`PoolRegistry`] plugs into `mycat_client::Environment` as its pool
//! manager and keeps one [`SessionPool`] per settings-equivalence key.
//!
//! ## Features
//!
//! - Session state reset when a session comes back
//! - Health checks via ping for sessions idle too long
//! - Min/max pool sizes from the connection settings
//! - Session lifetime expiry (`connection lifetime`)
//! - One procedure metadata cache shared by the pool's sessions
//! - Stale marking on clear, so sessions in use are closed on return
//! - Metrics and status for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mycat_client::Environment;
//! use mycat_driver_pool::PoolRegistry;
//!
//! let base = Environment::new();
//! let pools = Arc::new(
//!     PoolRegistry::builder(base.factory().clone())
//!         .reset_on_release(true)
//!         .build(),
//! );
//! let env = Environment::builder().pool(pools.clone()).build();
//!
//! let mut conn = env.connect_str("server=db1;user id=app;max pool size=20")?;
//! conn.open().await?;
//! conn.close().await?;
//!
//! let status = pools.get(conn.settings()).unwrap().status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;
pub mod registry;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{PoolMetrics, PoolStatus, SessionPool};
pub use registry::{PoolRegistry, PoolRegistryBuilder};
