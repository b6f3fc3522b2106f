//! Fluent SELECT accumulator.
//!
//! Mutator methods consume and return `Self` wrapped in `Result` so
//! identifier validation happens synchronously, before any terminal
//! operation ever reaches the connection: `ctx.select("users")?.and_where_eq("id", 1)?.get().await?`.

use crate::cache::CacheKey;
use crate::components::{Having, Join, JoinType, OrderByEntry, OrderDirection, SelectComponents};
use crate::connection::{query_failed, Row};
use crate::crypto::{decrypt_marked_fields, FieldCrypto};
use crate::dialect::DialectEngine;
use crate::error::{Error, Result};
use crate::identifier::{validate_identifier, validate_qualified_identifier};
use crate::query::context::QueryContext;
use crate::value::Value;
use crate::where_clause::WhereAssembler;
use std::collections::{HashSet, BTreeMap};
use std::time::Duration;

#[derive(Clone)]
pub struct SelectBuilder {
    ctx: QueryContext,
    components: SelectComponents,
    where_: WhereAssembler,
    decrypt_fields: HashSet<String>,
    cache_ttl: Option<Duration>,
    cache_tags: Vec<String>,
    cacheable: bool,
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

impl SelectBuilder {
    pub(crate) fn new(ctx: QueryContext, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_qualified_identifier(&table)?;
        Ok(SelectBuilder {
            ctx,
            components: SelectComponents {
                from: table,
                ..Default::default()
            },
            where_: WhereAssembler::new(),
            decrypt_fields: HashSet::new(),
            cache_ttl: None,
            cache_tags: Vec::new(),
            cacheable: false,
        })
    }

    /// Column expressions are passed through verbatim (dotted/aliased
    /// expressions are common here and are not identifiers in the simple
    /// sense), unlike every other identifier-typed entry point.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.components.distinct = true;
        self
    }

    pub fn from_alias(mut self, alias: impl Into<String>) -> Result<Self> {
        let alias = alias.into();
        validate_identifier(&alias)?;
        self.components.from_alias = Some(alias);
        Ok(self)
    }

    pub fn join(
        mut self,
        kind: JoinType,
        table: impl Into<String>,
        alias: Option<String>,
        condition: impl Into<String>,
        bindings: Vec<Value>,
    ) -> Result<Self> {
        let table = table.into();
        validate_qualified_identifier(&table)?;
        if let Some(a) = &alias {
            validate_identifier(a)?;
        }
        self.components.joins.push(Join {
            kind,
            table,
            alias,
            condition: condition.into(),
            bindings,
        });
        Ok(self)
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for col in columns {
            let col = col.into();
            validate_identifier(&col)?;
            self.components.group_by.push(col);
        }
        Ok(self)
    }

    /// `condition` is emitted verbatim; it is the caller's responsibility,
    /// same as raw where clauses.
    pub fn having(mut self, condition: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.components.having = Some(Having {
            condition: condition.into(),
            bindings,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Result<Self> {
        let column = column.into();
        validate_identifier(&column)?;
        self.components.order_by.push(OrderByEntry {
            column,
            direction,
            raw: None,
        });
        Ok(self)
    }

    pub fn order_by_raw(mut self, expression: impl Into<String>) -> Self {
        self.components.order_by.push(OrderByEntry {
            column: String::new(),
            direction: OrderDirection::Asc,
            raw: Some(expression.into()),
        });
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.components.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.components.offset = Some(n);
        self
    }

    pub fn paginate(self, page: i64, per_page: i64) -> Self {
        self.limit(per_page).offset((page - 1).max(0) * per_page)
    }

    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        self.paginate(page, per_page)
    }

    pub fn skip(self, n: i64) -> Self {
        self.offset(n)
    }

    pub fn take(self, n: i64) -> Self {
        self.limit(n)
    }

    /// Marks columns whose string values should be passed through
    /// `crypto.decrypt_field` after every row is fetched.
    pub fn decrypt<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decrypt_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Opts this query into the cache coordinator, if one is configured
    /// on the context. Without this call, `get()` always hits the
    /// connection directly.
    pub fn cached(mut self, ttl: Option<Duration>, tags: Vec<String>) -> Self {
        self.cacheable = true;
        self.cache_ttl = ttl;
        self.cache_tags = tags;
        self
    }

    where_proxy!(and_where_eq => and_eq, or_where_eq => or_eq, column: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_op => and_op, or_where_op => or_op, column: impl Into<String>, op: impl Into<String>, value: impl Into<Value>);
    where_proxy!(and_where_null => and_null, or_where_null => or_null, column: impl Into<String>);
    where_proxy!(and_where_not_null => and_not_null, or_where_not_null => or_not_null, column: impl Into<String>);
    where_proxy!(and_where_in => and_in, or_where_in => or_in, column: impl Into<String>, values: Vec<Value>);
    where_proxy!(and_where_not_in => and_not_in, or_where_not_in => or_not_in, column: impl Into<String>, values: Vec<Value>);
    where_proxy!(and_where_between => and_between, or_where_between => or_between, column: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>);
    where_proxy!(and_where_not_between => and_not_between, or_where_not_between => or_not_between, column: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>);
    where_proxy!(and_where_like => and_like, or_where_like => or_like, column: impl Into<String>, pattern: impl Into<String>);
    where_proxy!(and_where_not_like => and_not_like, or_where_not_like => or_not_like, column: impl Into<String>, pattern: impl Into<String>);

    pub fn and_where_map<K, V, I>(mut self, pairs: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.where_.and_map(pairs)?;
        Ok(self)
    }

    pub fn or_where_map<K, V, I>(mut self, pairs: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.where_.or_map(pairs)?;
        Ok(self)
    }

    pub fn and_where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.where_.and_raw(sql, bindings);
        self
    }

    pub fn or_where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.where_.or_raw(sql, bindings);
        self
    }

    fn components_with_where(&self) -> SelectComponents {
        let mut c = self.components.clone();
        c.where_ = self.where_.nodes().to_vec();
        c
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.ctx.dialect().build_select(&self.components_with_where())
    }

    async fn run(&self, components: &SelectComponents) -> Result<Vec<Row>> {
        let (sql, bindings) = self.ctx.dialect().build_select(components)?;
        let mut rows = if self.cacheable {
            match self.ctx.cache() {
                Some(cache) => {
                    let key = CacheKey::Fingerprint {
                        sql: sql.clone(),
                        bindings: bindings.clone(),
                    };
                    let connection = self.ctx.connection().clone();
                    let sql_for_build = sql.clone();
                    let bindings_for_build = bindings.clone();
                    cache
                        .get_or_build(key, self.cache_ttl, self.cache_tags.clone(), || async move {
                            let outcome = connection
                                .query(&sql_for_build, &bindings_for_build, None)
                                .await
                                .map_err(|e| query_failed(&sql_for_build, &bindings_for_build, None, e))?;
                            Ok(outcome.rows)
                        })
                        .await?
                }
                None => self.execute_uncached(&sql, &bindings).await?,
            }
        } else {
            self.execute_uncached(&sql, &bindings).await?
        };

        if !self.decrypt_fields.is_empty() {
            let crypto: Option<&dyn FieldCrypto> = self.ctx.crypto().map(|c| c.as_ref());
            for row in rows.iter_mut() {
                decrypt_marked_fields(crypto, row, &self.decrypt_fields).await;
            }
        }
        Ok(rows)
    }

    async fn execute_uncached(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        let outcome = self
            .ctx
            .connection()
            .query(sql, bindings, None)
            .await
            .map_err(|e| query_failed(sql, bindings, None, e))?;
        Ok(outcome.rows)
    }

    pub async fn get(&self) -> Result<Vec<Row>> {
        self.run(&self.components_with_where()).await
    }

    pub async fn first(&self) -> Result<Option<Row>> {
        let mut c = self.components_with_where();
        c.limit = Some(1);
        Ok(self.run(&c).await?.into_iter().next())
    }

    pub async fn first_or_fail(&self) -> Result<Row> {
        self.first().await?.ok_or(Error::NotFound)
    }

    pub async fn sole(&self) -> Result<Row> {
        let mut c = self.components_with_where();
        c.limit = Some(2);
        let mut rows = self.run(&c).await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(Error::NotSole(n)),
        }
    }

    async fn aggregate(&self, expression: String) -> Result<Option<Row>> {
        let mut c = self.components_with_where();
        c.columns = vec![expression];
        c.limit = None;
        c.offset = None;
        Ok(self.run(&c).await?.into_iter().next())
    }

    pub async fn count(&self, column: Option<&str>) -> Result<i64> {
        let col = column.unwrap_or("*");
        let expr = format!("COUNT({col}) AS count");
        let row = self.aggregate(expr).await?;
        Ok(row.and_then(|r| r.get("count").cloned()).and_then(value_as_i64).unwrap_or(0))
    }

    async fn scalar_aggregate(&self, func: &str, column: &str) -> Result<Option<f64>> {
        let escaped = self.ctx.dialect().escape_identifier(column);
        let expr = format!("{func}({escaped}) AS value");
        let row = self.aggregate(expr).await?;
        Ok(row.and_then(|r| r.get("value").cloned()).and_then(value_as_f64))
    }

    pub async fn sum(&self, column: &str) -> Result<Option<f64>> {
        self.scalar_aggregate("SUM", column).await
    }
    pub async fn avg(&self, column: &str) -> Result<Option<f64>> {
        self.scalar_aggregate("AVG", column).await
    }
    pub async fn min(&self, column: &str) -> Result<Option<f64>> {
        self.scalar_aggregate("MIN", column).await
    }
    pub async fn max(&self, column: &str) -> Result<Option<f64>> {
        self.scalar_aggregate("MAX", column).await
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count(None).await? > 0)
    }

    pub async fn doesnt_exist(&self) -> Result<bool> {
        Ok(!self.exists().await?)
    }

    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        let mut c = self.components_with_where();
        c.columns = vec![self.ctx.dialect().escape_identifier(column)];
        let rows = self.run(&c).await?;
        Ok(rows.into_iter().filter_map(|r| r.get(column).cloned()).collect())
    }

    pub async fn pluck_key_value(&self, value_column: &str, key_column: &str) -> Result<BTreeMap<String, Value>> {
        let dialect = self.ctx.dialect();
        let mut c = self.components_with_where();
        c.columns = vec![
            dialect.escape_identifier(key_column),
            dialect.escape_identifier(value_column),
        ];
        let rows = self.run(&c).await?;
        let mut out = BTreeMap::new();
        for row in rows {
            if let (Some(key), Some(value)) = (row.get(key_column), row.get(value_column)) {
                out.insert(value_as_string(key), value.clone());
            }
        }
        Ok(out)
    }

    /// Pages through results with a fixed `size`, invoking `on_page` for
    /// each non-empty page. Stops when `on_page` returns `false` or a
    /// page is shorter than `size`.
    pub async fn chunk<F>(&self, size: i64, mut on_page: F) -> Result<()>
    where
        F: FnMut(Vec<Row>) -> bool,
    {
        let mut page = 1;
        loop {
            let mut c = self.components_with_where();
            c.limit = Some(size);
            c.offset = Some((page - 1) * size);
            let rows = self.run(&c).await?;
            let len = rows.len() as i64;
            if rows.is_empty() {
                break;
            }
            let keep_going = on_page(rows);
            if !keep_going || len < size {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    /// Same paging discipline as `chunk`, exposed as a stream so callers
    /// can `while let Some(row) = stream.next().await`.
    pub fn lazy(self, chunk_size: i64) -> impl futures_util::Stream<Item = Result<Row>> {
        futures_util::stream::unfold(
            (self, 1i64, Vec::<Row>::new().into_iter(), false),
            move |(builder, page, mut buffer, done)| async move {
                if let Some(row) = buffer.next() {
                    return Some((Ok(row), (builder, page, buffer, done)));
                }
                if done {
                    return None;
                }
                let mut c = builder.components_with_where();
                c.limit = Some(chunk_size);
                c.offset = Some((page - 1) * chunk_size);
                match builder.run(&c).await {
                    Ok(rows) => {
                        let is_last_page = (rows.len() as i64) < chunk_size;
                        let mut iter = rows.into_iter();
                        match iter.next() {
                            Some(row) => Some((Ok(row), (builder, page + 1, iter, is_last_page))),
                            None => None,
                        }
                    }
                    Err(err) => Some((Err(err), (builder, page, Vec::new().into_iter(), true))),
                }
            },
        )
    }
}

fn value_as_i64(v: Value) -> Option<i64> {
    match v {
        Value::I64(n) => Some(n),
        Value::F64(n) => Some(n as i64),
        Value::Text(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_f64(v: Value) -> Option<f64> {
    match v {
        Value::I64(n) => Some(n as f64),
        Value::F64(n) => Some(n),
        Value::Text(s) => s.parse().ok(),
        Value::Null => None,
        _ => None,
    }
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::I64(n) => n.to_string(),
        Value::F64(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::connection::fake::FakeConnection;
    use crate::connection::QueryOutcome;
    use futures_util::StreamExt;
    use std::sync::Arc;

    fn ctx() -> (QueryContext, Arc<FakeConnection>) {
        let conn = Arc::new(FakeConnection::default());
        (QueryContext::new(Arc::clone(&conn) as Arc<dyn crate::connection::Connection>, DialectKind::PostgreSql), conn)
    }

    #[tokio::test]
    async fn basic_select_renders_expected_sql() {
        let (ctx, _conn) = ctx();
        let builder = ctx.select("users").unwrap().and_where_eq("status", "active").unwrap();
        let (sql, bindings) = builder.to_sql().unwrap();
        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"status\" = $1");
        assert_eq!(bindings, vec![Value::from("active")]);
    }

    #[tokio::test]
    async fn clone_independence_matches_where_clause_contract() {
        let (ctx, _conn) = ctx();
        let base = ctx.select("users").unwrap();
        let with_where = base.clone().and_where_eq("id", 1).unwrap();
        let (base_sql, _) = base.to_sql().unwrap();
        let (with_where_sql, _) = with_where.to_sql().unwrap();
        assert_ne!(base_sql, with_where_sql);
        assert_eq!(base_sql, "SELECT * FROM \"users\"");
    }

    #[tokio::test]
    async fn first_forces_limit_one() {
        let (ctx, conn) = ctx();
        let mut row = Row::default();
        row.0.insert("id".to_string(), Value::I64(1));
        conn.push_query_result(QueryOutcome {
            rows: vec![row],
            row_count: 1,
            fields: None,
        })
        .await;
        let builder = ctx.select("users").unwrap();
        let result = builder.first().await.unwrap();
        assert!(result.is_some());
        let statements = conn.executed_statements().await;
        assert!(statements[0].0.contains("LIMIT 1"));
    }

    #[tokio::test]
    async fn sole_fails_when_more_than_one_row_returned() {
        let (ctx, conn) = ctx();
        conn.push_query_result(QueryOutcome {
            rows: vec![Row::default(), Row::default()],
            row_count: 2,
            fields: None,
        })
        .await;
        let builder = ctx.select("users").unwrap();
        assert!(matches!(builder.sole().await, Err(Error::NotSole(2))));
    }

    #[tokio::test]
    async fn count_reads_alias_from_result_row() {
        let (ctx, conn) = ctx();
        let mut row = Row::default();
        row.0.insert("count".to_string(), Value::I64(42));
        conn.push_query_result(QueryOutcome {
            rows: vec![row],
            row_count: 1,
            fields: None,
        })
        .await;
        let builder = ctx.select("users").unwrap();
        assert_eq!(builder.count(None).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn chunk_stops_on_short_page() {
        let (ctx, conn) = ctx();
        conn.push_query_result(QueryOutcome {
            rows: vec![Row::default(), Row::default()],
            row_count: 2,
            fields: None,
        })
        .await;
        let builder = ctx.select("users").unwrap();
        let mut pages = 0;
        builder
            .chunk(2, |rows| {
                pages += 1;
                assert_eq!(rows.len(), 2);
                true
            })
            .await
            .unwrap();
        assert_eq!(pages, 1, "second page is empty, loop must stop");
    }

    #[tokio::test]
    async fn lazy_yields_rows_across_pages() {
        let (ctx, conn) = ctx();
        conn.push_query_result(QueryOutcome {
            rows: vec![Row::default(), Row::default()],
            row_count: 2,
            fields: None,
        })
        .await;
        let builder = ctx.select("users").unwrap();
        let rows: Vec<_> = builder.lazy(2).collect().await;
        assert_eq!(rows.len(), 2);
    }
}
