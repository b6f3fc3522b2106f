//! The front door applications construct once per logical database and
//! reuse for every query: owns the leased connection, the dialect engine,
//! and the optional cache/crypto collaborators, and hands out builders
//! that close over them.

use crate::cache::CacheCoordinator;
use crate::config::{DialectKind, TransactionOptions};
use crate::connection::Connection;
use crate::crypto::FieldCrypto;
use crate::dialect::DialectEngine;
use crate::query::delete::DeleteBuilder;
use crate::query::insert::InsertBuilder;
use crate::query::select::SelectBuilder;
use crate::query::update::UpdateBuilder;
use crate::transaction::TransactionCoordinator;
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryContext {
    connection: Arc<dyn Connection>,
    dialect: Arc<DialectEngine>,
    cache: Option<Arc<CacheCoordinator>>,
    crypto: Option<Arc<dyn FieldCrypto>>,
}

impl QueryContext {
    pub fn new(connection: Arc<dyn Connection>, dialect_kind: DialectKind) -> Self {
        QueryContext {
            connection,
            dialect: Arc::new(DialectEngine::new(dialect_kind)),
            cache: None,
            crypto: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheCoordinator>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn FieldCrypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn dialect(&self) -> &Arc<DialectEngine> {
        &self.dialect
    }

    pub fn select(&self, table: impl Into<String>) -> crate::error::Result<SelectBuilder> {
        SelectBuilder::new(self.clone(), table)
    }

    pub fn insert(&self, table: impl Into<String>) -> crate::error::Result<InsertBuilder> {
        InsertBuilder::new(self.clone(), table)
    }

    pub fn update(&self, table: impl Into<String>) -> crate::error::Result<UpdateBuilder> {
        UpdateBuilder::new(self.clone(), table)
    }

    pub fn delete(&self, table: impl Into<String>) -> crate::error::Result<DeleteBuilder> {
        DeleteBuilder::new(self.clone(), table)
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn cache(&self) -> Option<&Arc<CacheCoordinator>> {
        self.cache.as_ref()
    }

    pub(crate) fn crypto(&self) -> Option<&Arc<dyn FieldCrypto>> {
        self.crypto.as_ref()
    }

    /// Begins a new transaction over a connection leased for its lifetime.
    /// Out-of-transaction caching is bypassed entirely for the duration;
    /// on commit, tables written during the transaction are invalidated.
    pub async fn transaction(
        &self,
        options: Option<&TransactionOptions>,
    ) -> crate::error::Result<TransactionCoordinator> {
        let coordinator = TransactionCoordinator::new(Arc::clone(&self.connection), self.cache.clone());
        coordinator.begin(options).await?;
        Ok(coordinator)
    }
}
