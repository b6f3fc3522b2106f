//! The driver connection boundary.
//!
//! The concrete database driver is explicitly out of scope: this
//! module only defines the narrow interface this crate consumes. A real
//! host wires in an adapter over `sqlx`, `tokio-postgres`, or similar; the
//! `test-util` feature ships an in-memory fake so builder/coordinator tests
//! don't need one.

use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// One returned row, as a column-name-keyed map. Kept dialect-agnostic and
/// driver-agnostic; decoding into application types is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Row(pub HashMap<String, Value>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub affected_rows: u64,
    pub insert_id: Option<Value>,
}

/// The external driver-connection collaborator. Every method suspends
/// an optional `timeout` on `query`/`exec`
/// surfaces `Error::Timeout` and is treated as a failed query (no cache
/// write).
#[async_trait]
pub trait Connection: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        bindings: &[Value],
        timeout: Option<Duration>,
    ) -> Result<QueryOutcome, ConnectionError>;

    async fn exec(
        &self,
        sql: &str,
        bindings: &[Value],
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome, ConnectionError>;

    async fn begin(&self) -> Result<(), ConnectionError>;
    async fn commit(&self) -> Result<(), ConnectionError>;
    async fn rollback(&self) -> Result<(), ConnectionError>;
    async fn savepoint(&self, name: &str) -> Result<(), ConnectionError>;
    async fn release_savepoint(&self, name: &str) -> Result<(), ConnectionError>;
    async fn rollback_to_savepoint(&self, name: &str) -> Result<(), ConnectionError>;

    /// Returns the connection to its pool (or closes it). Called exactly
    /// once, when a transaction reaches a terminal state.
    async fn release(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("cannot connect: {0}")]
    CannotConnect(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("driver rejected query: {0}")]
    QueryRejected(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("operation timed out")]
    Timeout,
}

/// Maps a failed `query`/`exec` call to a crate-level error. A driver that
/// reports `ConnectionError::Timeout` against a call that supplied a
/// `timeout` surfaces as `Error::Timeout`; everything else (including a
/// driver timeout on a call with no deadline) is wrapped as `Error::Query`.
pub(crate) fn query_failed(
    sql: &str,
    bindings: &[Value],
    timeout: Option<Duration>,
    err: ConnectionError,
) -> crate::error::Error {
    if let (ConnectionError::Timeout, Some(duration)) = (&err, timeout) {
        return crate::error::Error::Timeout(duration);
    }
    crate::error::Error::Query {
        sql: sql.to_string(),
        bindings: bindings.to_vec(),
        source: Box::new(err),
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    /// A deterministic in-memory `Connection` for builder and coordinator
    /// tests. Records every statement it was asked to run and always
    /// returns the canned response queued for it (FIFO), or an empty
    /// result set if nothing was queued.
    pub struct FakeConnection {
        pub queued_query_results: Mutex<Vec<QueryOutcome>>,
        pub queued_exec_results: Mutex<Vec<ExecOutcome>>,
        pub executed: Mutex<Vec<(String, Vec<Value>)>>,
        pub fail_begin: Mutex<bool>,
        pub release_count: Mutex<u32>,
    }

    impl Default for FakeConnection {
        fn default() -> Self {
            FakeConnection {
                queued_query_results: Mutex::new(Vec::new()),
                queued_exec_results: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                fail_begin: Mutex::new(false),
                release_count: Mutex::new(0),
            }
        }
    }

    impl FakeConnection {
        pub async fn push_query_result(&self, outcome: QueryOutcome) {
            self.queued_query_results.lock().await.push(outcome);
        }

        pub async fn push_exec_result(&self, outcome: ExecOutcome) {
            self.queued_exec_results.lock().await.push(outcome);
        }

        pub async fn executed_statements(&self) -> Vec<(String, Vec<Value>)> {
            self.executed.lock().await.clone()
        }

        pub async fn set_fail_begin(&self, fail: bool) {
            *self.fail_begin.lock().await = fail;
        }

        pub async fn release_count(&self) -> u32 {
            *self.release_count.lock().await
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn query(
            &self,
            sql: &str,
            bindings: &[Value],
            _timeout: Option<Duration>,
        ) -> Result<QueryOutcome, ConnectionError> {
            self.executed
                .lock()
                .await
                .push((sql.to_string(), bindings.to_vec()));
            let mut queue = self.queued_query_results.lock().await;
            if queue.is_empty() {
                Ok(QueryOutcome::default())
            } else {
                Ok(queue.remove(0))
            }
        }

        async fn exec(
            &self,
            sql: &str,
            bindings: &[Value],
            _timeout: Option<Duration>,
        ) -> Result<ExecOutcome, ConnectionError> {
            self.executed
                .lock()
                .await
                .push((sql.to_string(), bindings.to_vec()));
            let mut queue = self.queued_exec_results.lock().await;
            if queue.is_empty() {
                Ok(ExecOutcome::default())
            } else {
                Ok(queue.remove(0))
            }
        }

        async fn begin(&self) -> Result<(), ConnectionError> {
            if *self.fail_begin.lock().await {
                return Err(ConnectionError::CannotConnect("forced failure".to_string()));
            }
            Ok(())
        }
        async fn commit(&self) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn rollback(&self) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn release_savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn rollback_to_savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn release(&self) {
            *self.release_count.lock().await += 1;
        }
    }
}
