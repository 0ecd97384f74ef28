//! # mycat-testing
//!
//! Test infrastructure for the mycat driver.
//!
//! - [`MockServer`]: an in-process X Protocol server answering statements by
//!   prefix rules and logging what it received
//! - [`MockTransport`]: one client connection to a mock server
//! - [`MockConnector`]: a `Connector` handing out mock transports, with
//!   per-host servers and refused hosts
//! - [`fixtures`]: settings, environments, a recording hook, a manual
//!   ambient transaction source and failover, replication, tunnel and SRV
//!   doubles
//!
//! ## Example
//!
//! ```rust,ignore
//! use mycat_testing::{MockServer, Reply, fixtures};
//!
//! let server = MockServer::new().on("SELECT", Reply::ints("n", [1]));
//! let (builder, _) = fixtures::environment(&server);
//! let mut conn = builder.build().connection(fixtures::settings());
//! conn.open().await?;
//! assert_eq!(conn.query_all("SELECT n", &[]).await?.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod server;
pub mod transport;

pub use server::{ER_QUERY_INTERRUPTED, MockServer, Reply};
pub use transport::{MockConnector, MockTransport};
