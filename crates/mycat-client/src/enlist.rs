//! Sessions enlisted in ambient transactions.
//!
//! While an ambient transaction runs, the session that joined it stays
//! bound to it even after the logical connection closes. The owner of the
//! transaction calls [`EnlistmentRegistry::complete`], which commits or
//! rolls back and then hands the session back to its pool or closes it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::connection::release_session;
use crate::error::{Error, Result};
use crate::session::SharedSession;
use crate::topology::{AmbientTransaction, PoolManager};

/// A session bound to a transaction, as seen by a connection opening.
#[derive(Clone)]
pub struct EnlistedSession {
    /// The session.
    pub session: SharedSession,
    /// Equivalence key of the settings it was opened with.
    pub settings_key: String,
    /// Whether a logical connection is using it right now.
    pub in_active_use: bool,
}

impl std::fmt::Debug for EnlistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnlistedSession")
            .field("in_active_use", &self.in_active_use)
            .finish_non_exhaustive()
    }
}

struct Enlistment {
    shared: EnlistedSession,
    pool: Option<Arc<dyn PoolManager>>,
}

/// Ambient transaction id to enlisted session.
#[derive(Default)]
pub struct EnlistmentRegistry {
    entries: Mutex<HashMap<String, Enlistment>>,
}

impl EnlistmentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session enlisted in `tx_id`.
    #[must_use]
    pub fn lookup(&self, tx_id: &str) -> Option<EnlistedSession> {
        self.entries.lock().get(tx_id).map(|e| e.shared.clone())
    }

    /// Whether `tx_id` still has an enlisted session.
    #[must_use]
    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.entries.lock().contains_key(tx_id)
    }

    /// Number of pending transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no transaction is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind `session` to `tx`.
    pub fn enlist(
        &self,
        tx: &AmbientTransaction,
        session: SharedSession,
        settings: &Config,
        pool: Option<Arc<dyn PoolManager>>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&tx.id) {
            if !Arc::ptr_eq(&existing.shared.session, &session) {
                return Err(Error::NotSupported(
                    "multiple connections in transaction not supported".into(),
                ));
            }
            return Ok(());
        }
        tracing::debug!(transaction = %tx.id, "session enlisted");
        entries.insert(
            tx.id.clone(),
            Enlistment {
                shared: EnlistedSession {
                    session,
                    settings_key: settings.equivalence_key(),
                    in_active_use: true,
                },
                pool,
            },
        );
        Ok(())
    }

    /// Mark whether a logical connection is using the session of `tx_id`.
    pub fn set_active(&self, tx_id: &str, active: bool) {
        if let Some(entry) = self.entries.lock().get_mut(tx_id) {
            entry.shared.in_active_use = active;
        }
    }

    /// Drop the session of `tx_id` without completing the transaction.
    ///
    /// Used when the session broke; the caller disposes of it. Returns
    /// whether `tx_id` had a session.
    pub fn remove(&self, tx_id: &str) -> bool {
        let removed = self.entries.lock().remove(tx_id).is_some();
        if removed {
            tracing::debug!(transaction = %tx_id, "broken session left the transaction");
        }
        removed
    }

    /// Commit or roll back `tx_id`, then release its session unless a
    /// connection is still using it.
    pub async fn complete(&self, tx_id: &str, committed: bool) -> Result<()> {
        let entry = self
            .entries
            .lock()
            .remove(tx_id)
            .ok_or_else(|| Error::InvalidArgument(format!("no session enlisted in '{tx_id}'")))?;

        let statement = if committed { "COMMIT" } else { "ROLLBACK" };
        let outcome = entry
            .shared
            .session
            .lock()
            .await
            .execute(statement, &[])
            .await
            .map(|_| ());
        tracing::debug!(
            transaction = %tx_id,
            committed,
            ok = outcome.is_ok(),
            "ambient transaction completed"
        );

        if !entry.shared.in_active_use {
            if let Err(e) = release_session(entry.shared.session, entry.pool).await {
                tracing::warn!(transaction = %tx_id, error = %e, "failed to release enlisted session");
            }
        }
        outcome
    }
}

impl std::fmt::Debug for EnlistmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnlistmentRegistry")
            .field("pending", &self.len())
            .finish()
    }
}
