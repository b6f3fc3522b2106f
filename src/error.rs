//! Crate-wide error type.
//!
//! One variant family per semantic kind from the failure-mode catalogue:
//! validation errors are synchronous and raised before any I/O, connection
//! and query errors surface to the caller, transaction errors fail the
//! in-flight operation, and cache/crypto errors never leave their
//! respective coordinators (they are logged and swallowed at the boundary).

use crate::value::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("{0} requires a non-empty value set")]
    EmptyValueSet(&'static str),

    #[error("query is missing required component: {0}")]
    MissingComponent(&'static str),

    #[error("insert rows must share the same column set")]
    MismatchedInsertColumns,

    #[error("negative limit or offset: {0}")]
    NegativeLimitOffset(i64),

    #[error("refusing to run an unconditional DELETE without force()")]
    UnsafeDelete,

    #[error("invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),

    #[error("savepoint {0:?} already exists")]
    DuplicateSavepoint(String),

    #[error("savepoint {0:?} does not exist")]
    UnknownSavepoint(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query {sql:?} failed: {source}")]
    Query {
        sql: String,
        bindings: Vec<Value>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transaction is not active")]
    TransactionNotActive,

    #[error("transaction is already active")]
    TransactionAlreadyActive,

    #[error("transaction failed to begin: {0}")]
    TransactionBeginFailed(String),

    #[error("transaction failed to commit: {0}")]
    TransactionCommitFailed(String),

    #[error("transaction failed to roll back: {0}")]
    TransactionRollbackFailed(String),

    #[error("no rows found")]
    NotFound,

    #[error("expected exactly one row, found {0}")]
    NotSole(usize),

    #[error("field encryption is required but no crypto provider is configured")]
    CryptoNotConfigured,
}
