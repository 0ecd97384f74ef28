//! Transaction support.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::instrumentation::span_names;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read (InnoDB default).
    #[default]
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
    /// Snapshot isolation; not available on MySQL.
    Snapshot,
    /// Chaos; not available on MySQL.
    Chaos,
}

impl IsolationLevel {
    /// Keyword used in `SET TRANSACTION ISOLATION LEVEL`.
    pub fn keyword(self) -> Result<&'static str> {
        match self {
            Self::ReadUncommitted => Ok("READ UNCOMMITTED"),
            Self::ReadCommitted => Ok("READ COMMITTED"),
            Self::RepeatableRead => Ok("REPEATABLE READ"),
            Self::Serializable => Ok("SERIALIZABLE"),
            Self::Snapshot => Err(Error::NotSupported(
                "snapshot isolation level is not supported".into(),
            )),
            Self::Chaos => Err(Error::NotSupported(
                "chaos isolation level is not supported".into(),
            )),
        }
    }
}

/// Which transactions an isolation change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionScope {
    /// Only the next transaction.
    #[default]
    Next,
    /// Every later transaction of the session.
    Session,
    /// Every later session on the server.
    Global,
}

/// `SET [scope] TRANSACTION ISOLATION LEVEL ...` for `level`.
pub fn isolation_statement(level: IsolationLevel, scope: TransactionScope) -> Result<String> {
    let keyword = level.keyword()?;
    Ok(match scope {
        TransactionScope::Next => format!("SET TRANSACTION ISOLATION LEVEL {keyword}"),
        TransactionScope::Session => format!("SET SESSION TRANSACTION ISOLATION LEVEL {keyword}"),
        TransactionScope::Global => format!("SET GLOBAL TRANSACTION ISOLATION LEVEL {keyword}"),
    })
}

/// A local transaction on a connection.
///
/// Dropping it without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) leaves the server transaction open; closing
/// a pooled connection rolls it back.
pub struct Transaction<'c> {
    connection: &'c mut Connection,
    isolation: IsolationLevel,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(connection: &'c mut Connection, isolation: IsolationLevel) -> Self {
        Self {
            connection,
            isolation,
        }
    }

    /// Get the isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// The connection the transaction runs on.
    pub fn connection(&mut self) -> &mut Connection {
        self.connection
    }

    /// Commit.
    pub async fn commit(self) -> Result<()> {
        tracing::debug!(name = span_names::COMMIT, "committing transaction");
        self.connection.execute("COMMIT", &[]).await.map(|_| ())
    }

    /// Roll back.
    pub async fn rollback(self) -> Result<()> {
        tracing::debug!(name = span_names::ROLLBACK, "rolling back transaction");
        self.connection.execute("ROLLBACK", &[]).await.map(|_| ())
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_statements() {
        assert_eq!(
            isolation_statement(IsolationLevel::default(), TransactionScope::Next).unwrap(),
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"
        );
        assert_eq!(
            isolation_statement(IsolationLevel::ReadCommitted, TransactionScope::Session).unwrap(),
            "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }

    #[test]
    fn test_unsupported_levels() {
        for level in [IsolationLevel::Chaos, IsolationLevel::Snapshot] {
            assert!(matches!(
                isolation_statement(level, TransactionScope::Global),
                Err(Error::NotSupported(_))
            ));
        }
    }
}
