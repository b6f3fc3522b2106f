//! Fluent DELETE accumulator. `execute()` refuses to render an
//! unconditional delete unless `force()` was called; `truncate()` bypasses
//! predicates entirely.

use crate::components::DeleteComponents;
use crate::connection::{query_failed, ExecOutcome, Row};
use crate::error::{Error, Result};
use crate::identifier::validate_qualified_identifier;
use crate::query::context::QueryContext;
use crate::value::Value;
use crate::where_clause::{require_force_for_unsafe_delete, WhereAssembler};

#[derive(Clone)]
pub struct DeleteBuilder {
    ctx: QueryContext,
    components: DeleteComponents,
    where_: WhereAssembler,
}

macro_rules! where_proxy {
    ($and_name:ident => $and_inner:ident, $or_name:ident => $or_inner:ident $(, $arg:ident: $ty:ty)*) => {
        pub fn $and_name(mut self $(, $arg: $ty)*) -> Result<Self> {
            self.where_.$and_inner($($arg),*)?;
            Ok(self)
        }
        pub fn $or_name(mut self $(, $arg: $ty)*) -> Result<Self> {
            self.where_.$or_inner($($arg),*)?;
            Ok(self)
        }
    };
}

impl DeleteBuilder {
    pub(crate) fn new(ctx: QueryContext, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_qualified_identifier(&table)?;
        Ok(DeleteBuilder {
            ctx,
            components: DeleteComponents {
                table,
                ..Default::default()
            },
            where_: WhereAssembler::new(),
        })
    }

    pub fn force(mut self) -> Self {
        self.components.force = true;
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cols = Vec::new();
        for col in columns {
            let col = col.into();
            crate::identifier::validate_identifier(&col)?;
            cols.push(col);
        }
        self.components.returning = Some(cols);
        Ok(self)
    }

    where_proxy!(and_where_eq => and_eq, or_where_eq => or_eq, column: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_op => and_op, or_where_op => or_op, column: impl Into<String>, op: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_in => and_in, or_where_in => or_in, column: impl Into<String>, values: Vec<Value>);

    fn components_with_where(&self) -> DeleteComponents {
        let mut c = self.components.clone();
        c.where_ = self.where_.nodes().to_vec();
        c
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.ctx.dialect().build_delete(&self.components_with_where())
    }

    pub async fn execute(&self) -> Result<ExecOutcome> {
        let components = self.components_with_where();
        require_force_for_unsafe_delete(&self.where_, components.force)?;
        let (sql, bindings) = self.ctx.dialect().build_delete(&components)?;
        let outcome = self
            .ctx
            .connection()
            .exec(&sql, &bindings, None)
            .await
            .map_err(|e| query_failed(&sql, &bindings, None, e))?;
        if let Some(cache) = self.ctx.cache() {
            cache.invalidate_for_write(&sql).await;
        }
        Ok(outcome)
    }

    /// Returns the deleted rows; implies `RETURNING *` if none was set.
    pub async fn get_deleted(&self) -> Result<Vec<Row>> {
        let mut components = self.components_with_where();
        require_force_for_unsafe_delete(&self.where_, components.force)?;
        if components.returning.is_none() {
            components.returning = Some(Vec::new());
        }
        let (sql, bindings) = self.ctx.dialect().build_delete(&components)?;
        let outcome = self
            .ctx
            .connection()
            .query(&sql, &bindings, None)
            .await
            .map_err(|e| query_failed(&sql, &bindings, None, e))?;
        if let Some(cache) = self.ctx.cache() {
            cache.invalidate_for_write(&sql).await;
        }
        Ok(outcome.rows)
    }

    pub async fn truncate(&self) -> Result<()> {
        let sql = self.ctx.dialect().build_truncate(&self.components.table)?;
        self.ctx
            .connection()
            .exec(&sql, &[], None)
            .await
            .map_err(|e| query_failed(&sql, &[], None, e))?;
        if let Some(cache) = self.ctx.cache() {
            cache.invalidate_for_write(&sql).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::connection::fake::FakeConnection;
    use std::sync::Arc;

    fn ctx() -> (QueryContext, Arc<FakeConnection>) {
        let conn = Arc::new(FakeConnection::default());
        (QueryContext::new(Arc::clone(&conn) as Arc<dyn crate::connection::Connection>, DialectKind::PostgreSql), conn)
    }

    #[tokio::test]
    async fn execute_without_predicates_or_force_is_rejected() {
        let (ctx, _conn) = ctx();
        let builder = ctx.delete("users").unwrap();
        assert!(matches!(builder.execute().await, Err(Error::UnsafeDelete)));
    }

    #[tokio::test]
    async fn execute_with_force_is_allowed() {
        let (ctx, _conn) = ctx();
        let builder = ctx.delete("users").unwrap().force();
        builder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn execute_with_predicate_does_not_need_force() {
        let (ctx, _conn) = ctx();
        let builder = ctx.delete("users").unwrap().and_where_eq("id", 1).unwrap();
        builder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn truncate_bypasses_predicates() {
        let (ctx, conn) = ctx();
        let builder = ctx.delete("logs").unwrap();
        builder.truncate().await.unwrap();
        let statements = conn.executed_statements().await;
        assert_eq!(statements[0].0, "TRUNCATE TABLE \"logs\"");
    }
}
