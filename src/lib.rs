//! Multi-dialect database access layer: dialect-aware SQL generation,
//! fluent query builders, tagged result caching, and transaction /
//! savepoint coordination.
//!
//! The concrete driver connection, cache backend, and field-encryption
//! primitive are external collaborators — this crate defines the
//! narrow traits a host wires a real implementation into
//! ([`connection::Connection`], [`cache::CacheStore`],
//! [`crypto::FieldCrypto`]) and owns everything above that line: SQL
//! rendering, the where-clause assembler, the builders, the cache
//! coordinator, and the transaction coordinator.

pub mod cache;
pub mod components;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod dialect;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod query;
pub mod transaction;
pub mod value;
pub mod where_clause;

pub use cache::{CacheCoordinator, CacheKey, CacheStore, Cacheable};
pub use components::{
    DeleteComponents, Having, InsertComponents, Join, JoinType, OrderByEntry, OrderDirection,
    SelectComponents, UpdateComponents, UpsertClause,
};
pub use config::{CacheConfig, DialectKind, IsolationLevel, TransactionOptions};
pub use connection::{Connection, ExecOutcome, QueryOutcome, Row};
pub use crypto::FieldCrypto;
pub use dialect::DialectEngine;
pub use error::{Error, Result};
pub use query::{DeleteBuilder, InsertBuilder, QueryContext, SelectBuilder, UpdateBuilder};
pub use transaction::TransactionCoordinator;
pub use value::Value;
pub use where_clause::{Conjunction, WhereAssembler, WhereCondition};
