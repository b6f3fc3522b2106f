//! Configuration value objects for the cache coordinator, dialect
//! selection, and transaction coordinator.
//!
//! These are plain `serde`-derived value structs; this crate does not read
//! or write a config file itself (unlike a CLI front-end, which would own
//! that). A host application that wants one can `toml::from_str` straight
//! into `CacheConfig`/`TransactionOptions` since both derive
//! `Serialize`/`Deserialize`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two dialects this crate renders SQL for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    MySql,
    PostgreSql,
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::MySql => write!(f, "mysql"),
            DialectKind::PostgreSql => write!(f, "postgresql"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported dialect: {0:?} (expected mysql, mariadb, postgresql, or postgres)")]
pub struct UnknownDialect(pub String);

impl FromStr for DialectKind {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DialectKind::MySql),
            "postgresql" | "postgres" => Ok(DialectKind::PostgreSql),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

/// Cache coordinator tuning knobs.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Default TTL (seconds) used when a cache request doesn't specify one.
    pub default_ttl: u64,
    /// Hard cap on TTL; requests above this are clamped, and a warning is
    /// logged when the clamp takes effect.
    pub max_ttl: u64,
    /// Prepended to every generated fingerprint key.
    pub prefix: String,
    /// Whether this coordinator's keyspace is shared process-wide or scoped
    /// to a single `QueryContext`.
    pub global: bool,
    /// Row-count threshold above which a cached result logs a warning but
    /// is still stored.
    pub warn_on_large_result: usize,
    /// Row-count threshold above which a result is returned to the caller
    /// but not cached at all.
    pub max_cacheable_rows: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl: 300,
            max_ttl: 3600,
            prefix: "qb:".to_string(),
            global: false,
            warn_on_large_result: 1000,
            max_cacheable_rows: 10_000,
        }
    }
}

/// `SET TRANSACTION` knobs applied before `BEGIN` proper when supplied.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TransactionOptions {
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: Option<bool>,
    pub deferrable: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}
