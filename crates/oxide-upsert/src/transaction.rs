//! Connection and transaction handling.
//!
//! An upsert runs either on a pool ("engine"), in which case it owns a
//! connection and a transaction for the whole call, or on a connection the
//! caller already holds, in which case it never begins, commits or rolls
//! back anything: transaction control stays with the caller, which allows
//! commit-as-you-go workflows.

use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use tracing::{debug, warn};

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};

/// Where an upsert gets its connection from.
pub enum Connectable<'c> {
    /// A pool. The upsert acquires a connection and runs in its own transaction.
    Engine(&'c AnyPool),
    /// An open connection, used as is.
    Connection(&'c mut AnyConnection),
}

impl Connectable<'_> {
    /// Dialect of the database behind this connectable.
    #[must_use]
    pub fn db_type(&self) -> DbType {
        match self {
            Self::Engine(pool) => DbType::of_pool(pool),
            Self::Connection(conn) => DbType::of_connection(conn),
        }
    }
}

impl<'c> From<&'c AnyPool> for Connectable<'c> {
    fn from(pool: &'c AnyPool) -> Self {
        Self::Engine(pool)
    }
}

impl<'c> From<&'c mut AnyConnection> for Connectable<'c> {
    fn from(conn: &'c mut AnyConnection) -> Self {
        Self::Connection(conn)
    }
}

/// Connection used for the duration of one upsert.
///
/// Dropping an owned handler without finishing it rolls the transaction
/// back and returns the connection to its pool.
pub enum TransactionHandler<'c> {
    /// Transaction begun on a connection acquired from a pool.
    Owned(Transaction<'static, Any>),
    /// Connection borrowed from the caller.
    Borrowed(&'c mut AnyConnection),
}

impl<'c> TransactionHandler<'c> {
    /// Acquires a connection and begins a transaction for an engine, or
    /// wraps a caller's connection.
    pub async fn begin(connectable: Connectable<'c>) -> Result<Self> {
        match connectable {
            Connectable::Engine(pool) => {
                let tx = pool.begin().await?;
                debug!("Began transaction on pooled connection");
                Ok(Self::Owned(tx))
            }
            Connectable::Connection(conn) => Ok(Self::Borrowed(conn)),
        }
    }

    /// Returns true if the handler owns its transaction.
    #[must_use]
    pub fn owns_transaction(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// The connection statements run on.
    pub fn connection(&mut self) -> &mut AnyConnection {
        match self {
            Self::Owned(tx) => &mut **tx,
            Self::Borrowed(conn) => &mut **conn,
        }
    }

    /// Commits an owned transaction. Does nothing for a borrowed connection.
    pub async fn commit(self) -> Result<()> {
        if let Self::Owned(tx) = self {
            tx.commit().await?;
            debug!("Committed transaction");
        }
        Ok(())
    }

    /// Rolls back an owned transaction. Does nothing for a borrowed connection.
    pub async fn rollback(self) -> Result<()> {
        if let Self::Owned(tx) = self {
            tx.rollback().await?;
            debug!("Rolled back transaction");
        }
        Ok(())
    }

    /// Rolls back after `err` and returns it.
    ///
    /// A failing rollback is logged; the original error is the one reported.
    pub async fn abort(self, err: UpsertError) -> UpsertError {
        if let Err(rollback_err) = self.rollback().await {
            warn!(error = %rollback_err, original = %err, "Rollback failed after error");
        }
        err
    }

    /// Commits on success and rolls back on failure.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => Err(self.abort(err).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyPoolOptions;

    async fn pool() -> AnyPool {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (x BIGINT)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn count(pool: &AnyPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_owned_commit() {
        let pool = pool().await;
        let mut handler = TransactionHandler::begin(Connectable::from(&pool)).await.unwrap();
        assert!(handler.owns_transaction());
        sqlx::query("INSERT INTO t VALUES (1)")
            .execute(handler.connection())
            .await
            .unwrap();
        handler.finish(Ok(())).await.unwrap();
        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_owned_rollback_on_error() {
        let pool = pool().await;
        let mut handler = TransactionHandler::begin(Connectable::from(&pool)).await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)")
            .execute(handler.connection())
            .await
            .unwrap();
        let outcome: Result<()> = Err(UpsertError::InvalidArgument("boom".to_string()));
        let err = handler.finish(outcome).await.unwrap_err();
        assert!(matches!(err, UpsertError::InvalidArgument(_)));
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_handler_rolls_back() {
        let pool = pool().await;
        {
            let mut handler =
                TransactionHandler::begin(Connectable::from(&pool)).await.unwrap();
            sqlx::query("INSERT INTO t VALUES (1)")
                .execute(handler.connection())
                .await
                .unwrap();
        }
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_borrowed_connection_is_left_alone() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut handler = TransactionHandler::begin(Connectable::from(&mut *conn))
            .await
            .unwrap();
        assert!(!handler.owns_transaction());
        assert_eq!(DbType::of_connection(handler.connection()), DbType::Sqlite);
        sqlx::query("INSERT INTO t VALUES (1)")
            .execute(handler.connection())
            .await
            .unwrap();
        // Rolling back a borrowed connection is a no-op: there is no transaction.
        handler.rollback().await.unwrap();

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
