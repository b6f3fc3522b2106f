//! Fluent UPDATE accumulator. `set` is mergeable across calls — later
//! calls overwrite earlier values for the same column, in first-seen
//! column order.

use crate::components::UpdateComponents;
use crate::connection::{query_failed, ExecOutcome, Row};
use crate::crypto::encrypt_marked_fields;
use crate::error::{Error, Result};
use crate::identifier::{validate_identifier, validate_qualified_identifier};
use crate::query::context::QueryContext;
use crate::value::Value;
use crate::where_clause::WhereAssembler;
use std::collections::HashSet;

#[derive(Clone)]
pub struct UpdateBuilder {
    ctx: QueryContext,
    components: UpdateComponents,
    where_: WhereAssembler,
    encrypt_fields: HashSet<String>,
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

impl UpdateBuilder {
    pub(crate) fn new(ctx: QueryContext, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_qualified_identifier(&table)?;
        Ok(UpdateBuilder {
            ctx,
            components: UpdateComponents {
                table,
                ..Default::default()
            },
            where_: WhereAssembler::new(),
            encrypt_fields: HashSet::new(),
        })
    }

    pub fn set<K, V, I>(mut self, data: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (col, value) in data {
            let col = col.into();
            validate_identifier(&col)?;
            let value = value.into();
            if let Some(existing) = self.components.data.iter_mut().find(|(k, _)| *k == col) {
                existing.1 = value;
            } else {
                self.components.data.push((col, value));
            }
        }
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

    pub fn encrypt<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encrypt_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    where_proxy!(and_where_eq => and_eq, or_where_eq => or_eq, column: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_op => and_op, or_where_op => or_op, column: impl Into<String>, op: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_null => and_null, or_where_null => or_null, column: impl Into<String>);
    where_proxy!(and_where_not_null => and_not_null, or_where_not_null => or_not_null, column: impl Into<String>);
    where_proxy!(and_where_in => and_in, or_where_in => or_in, column: impl Into<String>, values: Vec<Value>);
    where_proxy!(and_where_not_in => and_not_in, or_where_not_in => or_not_in, column: impl Into<String>, values: Vec<Value>);

    fn components_with_where(&self) -> UpdateComponents {
        let mut c = self.components.clone();
        c.where_ = self.where_.nodes().to_vec();
        c
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.ctx.dialect().build_update(&self.components_with_where())
    }

    async fn render_and_execute(&self) -> Result<ExecOutcome> {
        let mut components = self.components_with_where();
        encrypt_marked_fields(
            self.ctx.crypto().map(|c| c.as_ref()),
            &mut components.data,
            &self.encrypt_fields,
        )
        .await?;
        let (sql, bindings) = self.ctx.dialect().build_update(&components)?;
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

    pub async fn execute(&self) -> Result<ExecOutcome> {
        self.render_and_execute().await
    }

    pub async fn get_affected_rows(&self) -> Result<u64> {
        Ok(self.execute().await?.affected_rows)
    }

    async fn run_with_returning(&self) -> Result<Vec<Row>> {
        let mut components = self.components_with_where();
        if components.returning.is_none() {
            components.returning = Some(Vec::new());
        }
        encrypt_marked_fields(
            self.ctx.crypto().map(|c| c.as_ref()),
            &mut components.data,
            &self.encrypt_fields,
        )
        .await?;
        let (sql, bindings) = self.ctx.dialect().build_update(&components)?;
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

    pub async fn get_updated(&self) -> Result<Option<Row>> {
        Ok(self.run_with_returning().await?.into_iter().next())
    }

    pub async fn get_all_updated(&self) -> Result<Vec<Row>> {
        self.run_with_returning().await
    }
}
