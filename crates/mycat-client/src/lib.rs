//! # mycat-client
//!
//! Async MySQL client core speaking the X Protocol.
//!
//! This crate holds the logical connection and everything it drives: the
//! settings registry, the session handshake, the X Protocol engine, result
//! streaming, prepared statements, the stored-procedure metadata cache,
//! command timeouts, query cancellation and ambient transaction
//! enlistment. Pooling lives in `mycat-driver-pool`; failover, replication,
//! SSH tunnels and DNS SRV plug in through the traits in [`topology`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use mycat_client::Environment;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mycat_client::Error> {
//!     let env = Environment::new();
//!     let mut conn = env.connect_str("server=localhost;user id=app;password=secret;database=shop")?;
//!     conn.open().await?;
//!
//!     for row in conn.query_all("SELECT id, name FROM customers", &[]).await? {
//!         let name: String = row.get(1)?;
//!         println!("{name}");
//!     }
//!
//!     conn.close().await
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod connection;
pub mod enlist;
pub mod environment;
pub mod error;
pub mod hooks;
pub mod instrumentation;
pub mod procedure_cache;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod row;
pub mod schema;
pub mod session;
pub mod state;
pub mod statement;
pub mod timeout;
pub mod topology;
pub mod transaction;

pub use cancel::{CancellationToken, SideChannelFactory};
pub use config::{AuthMode, Config, Protocol, SshConfig, SslMode};
pub use connection::Connection;
pub use environment::{Environment, EnvironmentBuilder};
pub use error::{Error, Result};
pub use hooks::{HookPipeline, SessionHook};
pub use mycat_protocol::{Any, Scalar};
pub use procedure_cache::{ProcedureCache, ProcedureCacheEntry, ProcedureLookup};
pub use registry::SettingsRegistry;
pub use result::{ResultStream, ResultSummary};
pub use row::{Column, FromField, Row};
pub use schema::{SchemaRow, SchemaTable};
pub use session::{Session, SharedSession};
pub use state::{ConnectionState, StateChange};
pub use statement::PreparedStatement;
pub use timeout::{CommandDeadline, CommandTimer};
pub use topology::{
    AmbientTransaction, AmbientTransactions, Connector, FailoverManager, HostRecord, PoolManager,
    SessionFactory, TcpConnector,
};
pub use transaction::{IsolationLevel, Transaction, TransactionScope};
