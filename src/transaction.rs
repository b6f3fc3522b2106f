//! The transaction/savepoint state machine.
//!
//! `TransactionCoordinator` owns one leased `Connection` for its whole
//! lifetime and drives it through `NEW -> ACTIVE -> {COMMITTED, ROLLED_BACK,
//! FAILED_BEGIN}`. Savepoints form an ordered stack on top of the ACTIVE
//! state; rolling back to one pops every savepoint above it.

use crate::cache::CacheCoordinator;
use crate::config::TransactionOptions;
use crate::connection::{query_failed, Connection};
use crate::error::{Error, Result};
use crate::identifier::validate_identifier;
use crate::value::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Active,
    Committed,
    RolledBack,
    FailedBegin,
}

/// Drives one logical transaction over a leased connection. Not `Clone`:
/// a transaction has exactly one owner for its lifetime.
pub struct TransactionCoordinator {
    connection: Arc<dyn Connection>,
    cache: Option<Arc<CacheCoordinator>>,
    state: Mutex<State>,
    savepoints: Mutex<Vec<String>>,
    written_tables: Mutex<Vec<String>>,
}

impl TransactionCoordinator {
    pub fn new(connection: Arc<dyn Connection>, cache: Option<Arc<CacheCoordinator>>) -> Self {
        TransactionCoordinator {
            connection,
            cache,
            state: Mutex::new(State::New),
            savepoints: Mutex::new(Vec::new()),
            written_tables: Mutex::new(Vec::new()),
        }
    }

    pub async fn begin(&self, options: Option<&TransactionOptions>) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != State::New {
            return Err(Error::TransactionAlreadyActive);
        }
        if let Some(opts) = options {
            if let Err(err) = self.apply_options(opts).await {
                *state = State::FailedBegin;
                self.connection.release().await;
                return Err(err);
            }
        }
        match self.connection.begin().await {
            Ok(()) => {
                *state = State::Active;
                tracing::debug!("transaction active");
                Ok(())
            }
            Err(err) => {
                *state = State::FailedBegin;
                self.connection.release().await;
                Err(Error::TransactionBeginFailed(err.to_string()))
            }
        }
    }

    async fn apply_options(&self, options: &TransactionOptions) -> Result<()> {
        let mut clauses = Vec::new();
        if let Some(level) = options.isolation_level {
            clauses.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if let Some(read_only) = options.read_only {
            clauses.push(if read_only { "READ ONLY" } else { "READ WRITE" }.to_string());
        }
        if let Some(deferrable) = options.deferrable {
            clauses.push(if deferrable { "DEFERRABLE" } else { "NOT DEFERRABLE" }.to_string());
        }
        if clauses.is_empty() {
            return Ok(());
        }
        let sql = format!("SET TRANSACTION {}", clauses.join(", "));
        self.connection
            .exec(&sql, &[], None)
            .await
            .map_err(|e| Error::TransactionBeginFailed(e.to_string()))?;
        Ok(())
    }

    async fn require_active(&self) -> Result<()> {
        if *self.state.lock().await != State::Active {
            return Err(Error::TransactionNotActive);
        }
        Ok(())
    }

    pub async fn query(
        &self,
        sql: &str,
        bindings: &[Value],
    ) -> Result<crate::connection::QueryOutcome> {
        self.require_active().await?;
        self.connection
            .query(sql, bindings, None)
            .await
            .map_err(|e| query_failed(sql, bindings, None, e))
    }

    pub async fn exec(&self, sql: &str, bindings: &[Value]) -> Result<crate::connection::ExecOutcome> {
        self.require_active().await?;
        let outcome = self
            .connection
            .exec(sql, bindings, None)
            .await
            .map_err(|e| query_failed(sql, bindings, None, e))?;
        if self.cache.is_some() {
            for table in crate::cache::invalidation::extract_table_names(sql) {
                self.written_tables.lock().await.push(table);
            }
        }
        Ok(outcome)
    }

    pub async fn savepoint(&self, name: &str) -> Result<()> {
        self.require_active().await?;
        validate_identifier(name).map_err(|_| Error::InvalidSavepointName(name.to_string()))?;
        let mut stack = self.savepoints.lock().await;
        if stack.iter().any(|s| s == name) {
            return Err(Error::DuplicateSavepoint(name.to_string()));
        }
        self.connection
            .savepoint(name)
            .await
            .map_err(|e| Error::TransactionBeginFailed(e.to_string()))?;
        stack.push(name.to_string());
        Ok(())
    }

    pub async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.require_active().await?;
        let mut stack = self.savepoints.lock().await;
        let pos = stack
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::UnknownSavepoint(name.to_string()))?;
        self.connection
            .release_savepoint(name)
            .await
            .map_err(|e| Error::TransactionCommitFailed(e.to_string()))?;
        stack.truncate(pos);
        Ok(())
    }

    /// Rolls back to `name`, discarding every savepoint pushed after it.
    /// `name` itself remains on the stack and can be rolled back to again.
    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.require_active().await?;
        let mut stack = self.savepoints.lock().await;
        let pos = stack
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::UnknownSavepoint(name.to_string()))?;
        self.connection
            .rollback_to_savepoint(name)
            .await
            .map_err(|e| Error::TransactionRollbackFailed(e.to_string()))?;
        stack.truncate(pos + 1);
        Ok(())
    }

    /// Commits, releases the connection, and invalidates every table this
    /// transaction wrote to (tracked via the same best-effort regex scan
    /// used by out-of-transaction writes, not a blanket cache flush).
    pub async fn commit(&self) -> Result<()> {
        self.require_active().await?;
        self.connection
            .commit()
            .await
            .map_err(|e| Error::TransactionCommitFailed(e.to_string()))?;
        *self.state.lock().await = State::Committed;
        tracing::debug!("transaction committed");
        self.connection.release().await;

        if let Some(cache) = &self.cache {
            let tables = std::mem::take(&mut *self.written_tables.lock().await);
            for table in tables {
                let (tag, pattern) = crate::cache::invalidation::patterns_for_table(&table);
                cache.invalidate_by_tag(&tag).await;
                cache.invalidate_by_pattern(&pattern).await;
            }
        }
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.require_active().await?;
        self.connection
            .rollback()
            .await
            .map_err(|e| Error::TransactionRollbackFailed(e.to_string()))?;
        *self.state.lock().await = State::RolledBack;
        tracing::debug!("transaction rolled back");
        self.connection.release().await;
        self.written_tables.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::fake::InMemoryCacheStore;
    use crate::config::IsolationLevel;
    use crate::connection::fake::FakeConnection;

    fn txn() -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(FakeConnection::default()), None)
    }

    fn txn_with_connection() -> (TransactionCoordinator, Arc<FakeConnection>) {
        let connection = Arc::new(FakeConnection::default());
        (TransactionCoordinator::new(connection.clone(), None), connection)
    }

    #[tokio::test]
    async fn begin_then_commit_happy_path() {
        let t = txn();
        t.begin(None).await.unwrap();
        t.exec("UPDATE users SET x = 1", &[]).await.unwrap();
        t.commit().await.unwrap();
        assert!(matches!(*t.state.lock().await, State::Committed));
    }

    #[tokio::test]
    async fn operations_before_begin_are_rejected() {
        let t = txn();
        assert!(matches!(t.query("SELECT 1", &[]).await, Err(Error::TransactionNotActive)));
    }

    #[tokio::test]
    async fn double_begin_is_rejected() {
        let t = txn();
        t.begin(None).await.unwrap();
        assert!(matches!(t.begin(None).await, Err(Error::TransactionAlreadyActive)));
    }

    #[tokio::test]
    async fn failed_begin_releases_the_connection() {
        let (t, connection) = txn_with_connection();
        connection.set_fail_begin(true).await;
        assert!(matches!(t.begin(None).await, Err(Error::TransactionBeginFailed(_))));
        assert!(matches!(*t.state.lock().await, State::FailedBegin));
        assert_eq!(connection.release_count().await, 1);
    }

    #[tokio::test]
    async fn operations_after_commit_are_rejected() {
        let t = txn();
        t.begin(None).await.unwrap();
        t.commit().await.unwrap();
        assert!(matches!(t.exec("UPDATE x SET y=1", &[]).await, Err(Error::TransactionNotActive)));
    }

    #[tokio::test]
    async fn savepoint_stack_orders_and_rejects_duplicates() {
        let t = txn();
        t.begin(None).await.unwrap();
        t.savepoint("a").await.unwrap();
        t.savepoint("b").await.unwrap();
        assert!(matches!(t.savepoint("a").await, Err(Error::DuplicateSavepoint(_))));
        t.rollback_to_savepoint("a").await.unwrap();
        let stack = t.savepoints.lock().await;
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0], "a");
    }

    #[tokio::test]
    async fn unknown_savepoint_is_rejected() {
        let t = txn();
        t.begin(None).await.unwrap();
        assert!(matches!(t.release_savepoint("ghost").await, Err(Error::UnknownSavepoint(_))));
    }

    #[tokio::test]
    async fn begin_with_options_issues_set_transaction() {
        let conn = Arc::new(FakeConnection::default());
        let t = TransactionCoordinator::new(Arc::clone(&conn), None);
        let opts = TransactionOptions {
            isolation_level: Some(IsolationLevel::Serializable),
            read_only: Some(true),
            deferrable: None,
        };
        t.begin(Some(&opts)).await.unwrap();
        let statements = conn.executed_statements().await;
        assert_eq!(statements[0].0, "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY");
    }

    #[tokio::test]
    async fn commit_invalidates_tables_written_during_transaction() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = Arc::new(CacheCoordinator::new(store, crate::config::CacheConfig::default()));
        cache
            .get_or_build(
                crate::cache::CacheKey::Explicit("users-list".to_string()),
                None,
                vec!["table:users".to_string()],
                || async { Ok(vec![crate::connection::Row::default()]) },
            )
            .await
            .unwrap();

        let t = TransactionCoordinator::new(Arc::new(FakeConnection::default()), Some(Arc::clone(&cache)));
        t.begin(None).await.unwrap();
        t.exec("UPDATE users SET name = ?", &[Value::from("x")]).await.unwrap();
        t.commit().await.unwrap();

        let rebuilt: Vec<crate::connection::Row> = cache
            .get_or_build(
                crate::cache::CacheKey::Explicit("users-list".to_string()),
                None,
                vec![],
                || async { Ok(vec![crate::connection::Row::default(), crate::connection::Row::default()]) },
            )
            .await
            .unwrap();
        assert_eq!(rebuilt.len(), 2, "prior cache entry must have been invalidated on commit");
    }
}
