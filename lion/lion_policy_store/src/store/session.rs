//! Transaction scopes.
//!
//! Every top-level store operation runs inside one [`SessionScope`]. By
//! default the scope owns a fresh transaction and commits or rolls it back
//! when the operation finishes. When the adapter was built with a
//! [`SharedSession`], the scope borrows the caller's open transaction and
//! leaves the transaction boundary to the caller.

use std::fmt;
use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// An open SQLite transaction.
pub type SqliteTransaction = Transaction<'static, Sqlite>;

/// A caller-owned transaction that store operations can join.
///
/// The store never commits or rolls back a shared session. Clones refer to
/// the same transaction.
#[derive(Clone)]
pub struct SharedSession {
    tx: Arc<Mutex<Option<SqliteTransaction>>>,
}

impl SharedSession {
    /// Wrap an open transaction.
    pub fn new(tx: SqliteTransaction) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Begin a new transaction on `pool` and share it.
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        Ok(Self::new(pool.begin().await?))
    }

    /// Run a raw statement inside the shared transaction.
    ///
    /// # Returns
    ///
    /// The number of rows affected.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AdapterError::SessionClosed)?;
        let result = sqlx::query(sql).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    /// Commit the shared transaction.
    pub async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(AdapterError::SessionClosed)?;
        tx.commit().await?;
        debug!("Shared session committed");
        Ok(())
    }

    /// Roll back the shared transaction.
    pub async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(AdapterError::SessionClosed)?;
        tx.rollback().await?;
        debug!("Shared session rolled back");
        Ok(())
    }

    /// Check whether the transaction is still open.
    pub async fn is_open(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    async fn lock(&self) -> OwnedMutexGuard<Option<SqliteTransaction>> {
        Arc::clone(&self.tx).lock_owned().await
    }
}

impl fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSession").finish_non_exhaustive()
    }
}

enum ScopeInner {
    Owned(SqliteTransaction),
    Shared(OwnedMutexGuard<Option<SqliteTransaction>>),
}

/// The session for one top-level operation.
///
/// Dropping an unfinished owned scope rolls its transaction back.
pub(crate) struct SessionScope {
    inner: ScopeInner,
}

impl SessionScope {
    /// Acquire a scope, joining `shared` when given.
    pub(crate) async fn acquire(pool: &SqlitePool, shared: Option<&SharedSession>) -> Result<Self> {
        let inner = match shared {
            Some(session) => ScopeInner::Shared(session.lock().await),
            None => ScopeInner::Owned(pool.begin().await?),
        };
        Ok(Self { inner })
    }

    /// The connection to run statements on.
    pub(crate) fn conn(&mut self) -> Result<&mut SqliteConnection> {
        match &mut self.inner {
            ScopeInner::Owned(tx) => Ok(&mut **tx),
            ScopeInner::Shared(guard) => guard
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or(AdapterError::SessionClosed),
        }
    }

    /// End the scope with the operation's outcome.
    ///
    /// An owned transaction is committed on success and rolled back on
    /// failure, after which the original error is returned. A shared
    /// transaction is left open either way.
    pub(crate) async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match (self.inner, outcome) {
            (ScopeInner::Owned(tx), Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            (ScopeInner::Owned(tx), Err(err)) => {
                warn!("Rolling back policy transaction: {}", err);
                tx.rollback().await?;
                Err(err)
            }
            (ScopeInner::Shared(_), outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query("SELECT COUNT(*) FROM t")
            .fetch_one(pool)
            .await
            .unwrap()
            .get(0)
    }

    #[tokio::test]
    async fn test_owned_scope_commits() {
        let pool = pool().await;

        let mut scope = SessionScope::acquire(&pool, None).await.unwrap();
        let outcome: Result<()> = async {
            let conn = scope.conn()?;
            sqlx::query("INSERT INTO t VALUES (1)").execute(conn).await?;
            Ok(())
        }
        .await;
        scope.finish(outcome).await.unwrap();

        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_owned_scope_rolls_back() {
        let pool = pool().await;

        let mut scope = SessionScope::acquire(&pool, None).await.unwrap();
        let outcome: Result<()> = async {
            let conn = scope.conn()?;
            sqlx::query("INSERT INTO t VALUES (1)").execute(conn).await?;
            Err(AdapterError::RuleNotFound("p, x".to_string()))
        }
        .await;
        let result = scope.finish(outcome).await;

        assert!(matches!(result, Err(AdapterError::RuleNotFound(_))));
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_shared_scope_leaves_transaction_open() {
        let pool = pool().await;
        let session = SharedSession::begin(&pool).await.unwrap();

        let mut scope = SessionScope::acquire(&pool, Some(&session)).await.unwrap();
        let outcome: Result<()> = async {
            let conn = scope.conn()?;
            sqlx::query("INSERT INTO t VALUES (1)").execute(conn).await?;
            Err(AdapterError::RuleNotFound("p, x".to_string()))
        }
        .await;
        assert!(scope.finish(outcome).await.is_err());

        assert!(session.is_open().await);
        session.rollback().await.unwrap();
        assert!(!session.is_open().await);
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_closed_shared_session() {
        let pool = pool().await;
        let session = SharedSession::begin(&pool).await.unwrap();
        assert_eq!(session.execute("INSERT INTO t VALUES (1)").await.unwrap(), 1);
        session.commit().await.unwrap();

        let mut scope = SessionScope::acquire(&pool, Some(&session)).await.unwrap();
        assert!(matches!(scope.conn(), Err(AdapterError::SessionClosed)));
        drop(scope);
        assert!(matches!(session.commit().await, Err(AdapterError::SessionClosed)));

        assert_eq!(count(&pool).await, 1);
    }
}
