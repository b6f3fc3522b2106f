//! Fluent INSERT accumulator, including MySQL `INSERT IGNORE` and both
//! dialects' upsert forms.

use crate::components::{InsertComponents, UpsertClause};
use crate::connection::{query_failed, Row};
use crate::crypto::encrypt_marked_fields;
use crate::error::{Error, Result};
use crate::identifier::{validate_identifier, validate_qualified_identifier};
use crate::query::context::QueryContext;
use crate::value::Value;
use std::collections::HashSet;

#[derive(Clone)]
pub struct InsertBuilder {
    ctx: QueryContext,
    components: InsertComponents,
    encrypt_fields: HashSet<String>,
}

impl InsertBuilder {
    pub(crate) fn new(ctx: QueryContext, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_qualified_identifier(&table)?;
        Ok(InsertBuilder {
            ctx,
            components: InsertComponents {
                table,
                ..Default::default()
            },
            encrypt_fields: HashSet::new(),
        })
    }

    /// Adds one row. Every row must share the same column set, in the
    /// order of the first row added.
    pub fn values<K, V, I>(mut self, row: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs: Vec<(String, Value)> = row
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        for (col, _) in &pairs {
            validate_identifier(col)?;
        }

        if self.components.columns.is_empty() {
            self.components.columns = pairs.iter().map(|(k, _)| k.clone()).collect();
        } else if self.components.columns.len() != pairs.len()
            || !self.components.columns.iter().zip(pairs.iter()).all(|(a, (b, _))| a == b)
        {
            return Err(Error::MismatchedInsertColumns);
        }

        self.components.rows.push(pairs.into_iter().map(|(_, v)| v).collect());
        Ok(self)
    }

    pub fn returning<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cols = Vec::new();
        for col in columns {
            let col = col.into();
            validate_identifier(&col)?;
            cols.push(col);
        }
        self.components.returning = Some(cols);
        Ok(self)
    }

    /// MySQL-only: rewrites `INSERT INTO` to `INSERT IGNORE INTO`. A
    /// no-op flag under PostgreSQL.
    pub fn ignore(mut self) -> Self {
        self.components.ignore = true;
        self
    }

    pub fn upsert<I, S>(mut self, conflict_keys: I, update_columns: Vec<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys = Vec::new();
        for key in conflict_keys {
            let key = key.into();
            validate_identifier(&key)?;
            keys.push(key);
        }
        for col in &update_columns {
            validate_identifier(col)?;
        }
        self.components.upsert = Some(UpsertClause {
            conflict_keys: keys,
            update_columns,
        });
        Ok(self)
    }

    pub fn encrypt<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encrypt_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.ctx.dialect().build_insert(&self.components)
    }

    async fn render_and_execute(&self) -> Result<(String, crate::connection::ExecOutcome)> {
        let mut components = self.components.clone();
        for row in components.rows.iter_mut() {
            let mut pairs: Vec<(String, Value)> = components
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            encrypt_marked_fields(self.ctx.crypto().map(|c| c.as_ref()), &mut pairs, &self.encrypt_fields).await?;
            *row = pairs.into_iter().map(|(_, v)| v).collect();
        }
        let (sql, bindings) = self.ctx.dialect().build_insert(&components)?;
        let outcome = self
            .ctx
            .connection()
            .exec(&sql, &bindings, None)
            .await
            .map_err(|e| query_failed(&sql, &bindings, None, e))?;
        if let Some(cache) = self.ctx.cache() {
            cache.invalidate_for_write(&sql).await;
        }
        Ok((sql, outcome))
    }

    pub async fn execute(&self) -> Result<crate::connection::ExecOutcome> {
        if self.components.rows.is_empty() || self.components.columns.is_empty() {
            return Err(Error::EmptyValueSet("insert"));
        }
        let (_, outcome) = self.render_and_execute().await?;
        Ok(outcome)
    }

    pub async fn get_insert_id(&self) -> Result<Option<Value>> {
        Ok(self.execute().await?.insert_id)
    }

    /// Re-renders with an implicit `RETURNING *` when none was set, runs
    /// it as a query (not an exec), and returns the first row.
    pub async fn get_inserted(&self) -> Result<Option<Row>> {
        if self.components.rows.is_empty() || self.components.columns.is_empty() {
            return Err(Error::EmptyValueSet("insert"));
        }
        let mut builder = self.clone();
        if builder.components.returning.is_none() {
            builder.components.returning = Some(Vec::new());
        }
        let mut components = builder.components.clone();
        for row in components.rows.iter_mut() {
            let mut pairs: Vec<(String, Value)> = components
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            encrypt_marked_fields(builder.ctx.crypto().map(|c| c.as_ref()), &mut pairs, &builder.encrypt_fields)
                .await?;
            *row = pairs.into_iter().map(|(_, v)| v).collect();
        }
        let (sql, bindings) = builder.ctx.dialect().build_insert(&components)?;
        let outcome = builder
            .ctx
            .connection()
            .query(&sql, &bindings, None)
            .await
            .map_err(|e| query_failed(&sql, &bindings, None, e))?;
        if let Some(cache) = builder.ctx.cache() {
            cache.invalidate_for_write(&sql).await;
        }
        Ok(outcome.rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::connection::fake::FakeConnection;
    use crate::connection::{ExecOutcome, QueryOutcome};
    use std::sync::Arc;

    fn ctx() -> (QueryContext, Arc<FakeConnection>) {
        let conn = Arc::new(FakeConnection::default());
        (QueryContext::new(Arc::clone(&conn) as Arc<dyn crate::connection::Connection>, DialectKind::PostgreSql), conn)
    }

    #[tokio::test]
    async fn renders_multi_row_insert_with_returning() {
        let (ctx, _conn) = ctx();
        let builder = ctx
            .insert("users")
            .unwrap()
            .values(vec![("name", Value::from("John")), ("email", Value::from("j@x"))])
            .unwrap()
            .returning(["id", "created_at"])
            .unwrap();
        let (sql, bindings) = builder.to_sql().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2) RETURNING \"id\", \"created_at\""
        );
        assert_eq!(bindings, vec![Value::from("John"), Value::from("j@x")]);
    }

    #[tokio::test]
    async fn mismatched_row_columns_are_rejected() {
        let (ctx, _conn) = ctx();
        let result = ctx
            .insert("users")
            .unwrap()
            .values(vec![("name", Value::from("a"))])
            .unwrap()
            .values(vec![("email", Value::from("b"))]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn execute_without_rows_is_rejected() {
        let (ctx, _conn) = ctx();
        let builder = ctx.insert("users").unwrap();
        assert!(matches!(builder.execute().await, Err(Error::EmptyValueSet(_))));
    }

    #[tokio::test]
    async fn get_insert_id_reads_exec_outcome() {
        let (ctx, conn) = ctx();
        conn.push_exec_result(ExecOutcome {
            affected_rows: 1,
            insert_id: Some(Value::I64(7)),
        })
        .await;
        let builder = ctx.insert("users").unwrap().values(vec![("name", Value::from("a"))]).unwrap();
        assert_eq!(builder.get_insert_id().await.unwrap(), Some(Value::I64(7)));
    }

    #[tokio::test]
    async fn get_inserted_runs_as_query_with_implicit_star() {
        let (ctx, conn) = ctx();
        let mut row = Row::default();
        row.0.insert("id".to_string(), Value::I64(1));
        conn.push_query_result(QueryOutcome {
            rows: vec![row],
            row_count: 1,
            fields: None,
        })
        .await;
        let builder = ctx.insert("users").unwrap().values(vec![("name", Value::from("a"))]).unwrap();
        let inserted = builder.get_inserted().await.unwrap();
        assert!(inserted.is_some());
        let statements = conn.executed_statements().await;
        assert!(statements[0].0.contains("RETURNING"));
    }
}
