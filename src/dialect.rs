//! Deterministic translation of a `Components` record into `(sql, bindings)`.
//!
//! Two closed dialects, no open trait hierarchy (`MySql` and `PostgreSql`
//! are the entire enum). The
//! placeholder counter is the one piece of interior mutable state on this
//! type — it is reset at the start of every render and is *not* safe for
//! concurrent rendering on a shared instance; callers either serialize
//! renders on one engine or use
//! one engine per render.

use crate::components::{
    DeleteComponents, InsertComponents, Join, JoinType, OrderByEntry, SelectComponents,
    UpdateComponents, UpsertClause,
};
use crate::config::DialectKind;
use crate::error::{Error, Result};
use crate::value::Value;
use crate::where_clause::{Conjunction, WhereCondition, WhereNode};
use std::sync::atomic::{AtomicU32, Ordering};

pub struct DialectEngine {
    kind: DialectKind,
    counter: AtomicU32,
}

impl DialectEngine {
    pub fn new(kind: DialectKind) -> Self {
        DialectEngine {
            kind,
            counter: AtomicU32::new(0),
        }
    }

    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    fn quote_char(&self) -> char {
        match self.kind {
            DialectKind::MySql => '`',
            DialectKind::PostgreSql => '"',
        }
    }

    /// Wraps `name` in the dialect's identifier quote. `schema.table` is
    /// split on `.` and each segment quoted independently; an embedded
    /// quote character is doubled.
    pub fn escape_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        name.split('.')
            .map(|segment| {
                let doubled = segment.replace(q, &format!("{q}{q}"));
                format!("{q}{doubled}{q}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn reset_placeholders(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }

    /// Returns `?` (MySQL) or the next `$N` (PostgreSQL, 1-based).
    pub fn next_placeholder(&self) -> String {
        match self.kind {
            DialectKind::MySql => "?".to_string(),
            DialectKind::PostgreSql => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("${n}")
            }
        }
    }

    /// Inline literal rendering: LIMIT/OFFSET and debug dumps only. Never
    /// used for user-supplied data on the normal bound-parameter path.
    pub fn escape_value(&self, v: &Value) -> String {
        match v {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self.kind {
                DialectKind::PostgreSql => if *b { "TRUE" } else { "FALSE" }.to_string(),
                DialectKind::MySql => if *b { "1" } else { "0" }.to_string(),
            },
            Value::I64(n) => n.to_string(),
            Value::F64(n) => n.to_string(),
            Value::Timestamp(ts) => match self.kind {
                DialectKind::PostgreSql => {
                    format!("'{}'::timestamptz", ts.to_rfc3339())
                }
                DialectKind::MySql => {
                    format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S"))
                }
            },
            Value::Bytes(bytes) => match self.kind {
                DialectKind::MySql => format!("X'{}'", hex::encode(bytes)),
                DialectKind::PostgreSql => format!("'\\x{}'::bytea", hex::encode(bytes)),
            },
            Value::Text(s) => self.escape_string_literal(s),
            Value::Array(items) => match self.kind {
                DialectKind::PostgreSql => {
                    let rendered: Vec<String> = items.iter().map(|i| self.escape_value(i)).collect();
                    format!("ARRAY[{}]", rendered.join(", "))
                }
                DialectKind::MySql => self.escape_string_literal(&self.json_literal(v)),
            },
            Value::Object(_) => match self.kind {
                DialectKind::PostgreSql => format!("'{}'::jsonb", self.json_literal(v).replace('\'', "''")),
                DialectKind::MySql => self.escape_string_literal(&self.json_literal(v)),
            },
        }
    }

    fn json_literal(&self, v: &Value) -> String {
        serde_json::to_string(&crate::value::value_to_json(v)).unwrap_or_default()
    }

    fn escape_string_literal(&self, s: &str) -> String {
        match self.kind {
            DialectKind::PostgreSql => format!("'{}'", s.replace('\'', "''")),
            DialectKind::MySql => {
                let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
                format!("'{escaped}'")
            }
        }
    }

    // ---- SELECT ----------------------------------------------------

    pub fn build_select(&self, c: &SelectComponents) -> Result<(String, Vec<Value>)> {
        if c.from.is_empty() {
            return Err(Error::MissingComponent("from"));
        }
        self.reset_placeholders();
        let mut bindings = Vec::new();
        let mut sql = String::from("SELECT ");
        if c.distinct {
            sql.push_str("DISTINCT ");
        }
        if c.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&c.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.escape_identifier(&c.from));
        if let Some(alias) = &c.from_alias {
            sql.push_str(" AS ");
            sql.push_str(&self.escape_identifier(alias));
        }
        for join in &c.joins {
            sql.push(' ');
            sql.push_str(&self.render_join(join, &mut bindings));
        }
        if !c.where_.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_where(&c.where_, &mut bindings));
        }
        if !c.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            let cols: Vec<String> = c.group_by.iter().map(|g| self.escape_identifier(g)).collect();
            sql.push_str(&cols.join(", "));
        }
        if let Some(having) = &c.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.condition);
            bindings.extend(having.bindings.clone());
        }
        if !c.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.render_order_by(&c.order_by));
        }
        if let Some(limit) = c.limit {
            if limit < 0 {
                return Err(Error::NegativeLimitOffset(limit));
            }
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = c.offset {
            if offset < 0 {
                return Err(Error::NegativeLimitOffset(offset));
            }
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok((sql, bindings))
    }

    fn render_join(&self, join: &Join, bindings: &mut Vec<Value>) -> String {
        let mut s = String::new();
        s.push_str(join.kind.as_sql());
        s.push(' ');
        s.push_str(&self.escape_identifier(&join.table));
        if let Some(alias) = &join.alias {
            s.push_str(" AS ");
            s.push_str(&self.escape_identifier(alias));
        }
        if !matches!(join.kind, JoinType::Cross) {
            s.push_str(" ON ");
            s.push_str(&join.condition);
            bindings.extend(join.bindings.clone());
        }
        s
    }

    fn render_order_by(&self, entries: &[OrderByEntry]) -> String {
        entries
            .iter()
            .map(|e| {
                if let Some(raw) = &e.raw {
                    raw.clone()
                } else {
                    format!("{} {}", self.escape_identifier(&e.column), e.direction.as_sql())
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ---- INSERT ------------------------------------------------------

    pub fn build_insert(&self, c: &InsertComponents) -> Result<(String, Vec<Value>)> {
        if c.table.is_empty() {
            return Err(Error::MissingComponent("table"));
        }
        if c.rows.is_empty() || c.columns.is_empty() {
            return Err(Error::EmptyValueSet("insert"));
        }
        self.reset_placeholders();
        let mut bindings = Vec::new();

        let verb = if c.ignore && matches!(self.kind, DialectKind::MySql) {
            "INSERT IGNORE INTO"
        } else {
            "INSERT INTO"
        };

        let columns_sql: Vec<String> = c.columns.iter().map(|col| self.escape_identifier(col)).collect();
        let mut tuples = Vec::with_capacity(c.rows.len());
        for row in &c.rows {
            let placeholders: Vec<String> = row.iter().map(|_| self.next_placeholder()).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
            bindings.extend(row.iter().cloned());
        }

        let mut sql = format!(
            "{verb} {} ({}) VALUES {}",
            self.escape_identifier(&c.table),
            columns_sql.join(", "),
            tuples.join(", ")
        );

        if let Some(upsert) = &c.upsert {
            sql.push_str(&self.render_upsert(c, upsert));
        }

        if let Some(returning) = &c.returning {
            self.append_returning(&mut sql, returning);
        }

        Ok((sql, bindings))
    }

    fn render_upsert(&self, c: &InsertComponents, upsert: &UpsertClause) -> String {
        let update_cols: Vec<&String> = c
            .columns
            .iter()
            .filter(|col| !upsert.conflict_keys.contains(col))
            .collect();

        match self.kind {
            DialectKind::MySql => {
                let assignments: Vec<String> = update_cols
                    .iter()
                    .map(|col| {
                        let escaped = self.escape_identifier(col);
                        format!("{escaped} = VALUES({escaped})")
                    })
                    .collect();
                format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
            }
            DialectKind::PostgreSql => {
                let keys: Vec<String> = upsert
                    .conflict_keys
                    .iter()
                    .map(|k| self.escape_identifier(k))
                    .collect();
                if upsert.update_columns.is_empty() {
                    format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", "))
                } else {
                    let assignments: Vec<String> = upsert
                        .update_columns
                        .iter()
                        .map(|col| {
                            let escaped = self.escape_identifier(col);
                            format!("{escaped} = EXCLUDED.{escaped}")
                        })
                        .collect();
                    format!(
                        " ON CONFLICT ({}) DO UPDATE SET {}",
                        keys.join(", "),
                        assignments.join(", ")
                    )
                }
            }
        }
    }

    fn append_returning(&self, sql: &mut String, returning: &[String]) {
        let cols: Vec<String> = if returning.is_empty() {
            vec!["*".to_string()]
        } else {
            returning.iter().map(|c| self.escape_identifier(c)).collect()
        };
        sql.push_str(" RETURNING ");
        sql.push_str(&cols.join(", "));
    }

    // ---- UPDATE --------------------------------------------------------

    pub fn build_update(&self, c: &UpdateComponents) -> Result<(String, Vec<Value>)> {
        if c.table.is_empty() {
            return Err(Error::MissingComponent("table"));
        }
        if c.data.is_empty() {
            return Err(Error::EmptyValueSet("update"));
        }
        self.reset_placeholders();
        let mut bindings = Vec::new();

        let assignments: Vec<String> = c
            .data
            .iter()
            .map(|(col, value)| {
                let placeholder = self.next_placeholder();
                bindings.push(value.clone());
                format!("{} = {}", self.escape_identifier(col), placeholder)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.escape_identifier(&c.table),
            assignments.join(", ")
        );

        if !c.where_.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_where(&c.where_, &mut bindings));
        }

        if let Some(returning) = &c.returning {
            self.append_returning(&mut sql, returning);
        }

        Ok((sql, bindings))
    }

    // ---- DELETE --------------------------------------------------------

    pub fn build_delete(&self, c: &DeleteComponents) -> Result<(String, Vec<Value>)> {
        if c.table.is_empty() {
            return Err(Error::MissingComponent("table"));
        }
        if c.where_.is_empty() && !c.force {
            return Err(Error::UnsafeDelete);
        }
        self.reset_placeholders();
        let mut bindings = Vec::new();

        let mut sql = format!("DELETE FROM {}", self.escape_identifier(&c.table));
        if !c.where_.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_where(&c.where_, &mut bindings));
        }

        if let Some(returning) = &c.returning {
            self.append_returning(&mut sql, returning);
        }

        Ok((sql, bindings))
    }

    pub fn build_truncate(&self, table: &str) -> Result<String> {
        if table.is_empty() {
            return Err(Error::MissingComponent("table"));
        }
        self.reset_placeholders();
        Ok(format!("TRUNCATE TABLE {}", self.escape_identifier(table)))
    }

    // ---- WHERE rendering, shared by all four statement kinds -----------

    fn render_where(&self, nodes: &[WhereNode], bindings: &mut Vec<Value>) -> String {
        let mut out = String::new();
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                out.push_str(match node.conjunction {
                    Conjunction::And => " AND ",
                    Conjunction::Or => " OR ",
                });
            }
            out.push_str(&self.render_condition(&node.condition, bindings));
        }
        out
    }

    fn render_condition(&self, condition: &WhereCondition, bindings: &mut Vec<Value>) -> String {
        match condition {
            WhereCondition::Simple { column, op, value } => {
                let col = self.escape_identifier(column);
                if value.is_null() && (op == "=" || op == "==") {
                    format!("{col} IS NULL")
                } else if value.is_null() && (op == "!=" || op == "<>") {
                    format!("{col} IS NOT NULL")
                } else {
                    let placeholder = self.next_placeholder();
                    bindings.push(value.clone());
                    format!("{col} {op} {placeholder}")
                }
            }
            WhereCondition::Object(pairs) => {
                let rendered: Vec<String> = pairs
                    .iter()
                    .map(|(col, value)| {
                        self.render_condition(
                            &WhereCondition::Simple {
                                column: col.clone(),
                                op: "=".to_string(),
                                value: value.clone(),
                            },
                            bindings,
                        )
                    })
                    .collect();
                let joined = rendered.join(" AND ");
                if rendered.len() > 1 {
                    format!("({joined})")
                } else {
                    joined
                }
            }
            WhereCondition::Raw { sql, bindings: raw_bindings } => {
                bindings.extend(raw_bindings.clone());
                sql.clone()
            }
            WhereCondition::Null { column, negated } => {
                let col = self.escape_identifier(column);
                if *negated {
                    format!("{col} IS NOT NULL")
                } else {
                    format!("{col} IS NULL")
                }
            }
            WhereCondition::In { column, values, negated } => {
                let col = self.escape_identifier(column);
                if values.is_empty() {
                    if *negated { "1=1".to_string() } else { "1=0".to_string() }
                } else {
                    let placeholders: Vec<String> = values.iter().map(|_| self.next_placeholder()).collect();
                    bindings.extend(values.iter().cloned());
                    let kw = if *negated { "NOT IN" } else { "IN" };
                    format!("{col} {kw} ({})", placeholders.join(", "))
                }
            }
            WhereCondition::Between { column, from, to, negated } => {
                let col = self.escape_identifier(column);
                let p1 = self.next_placeholder();
                let p2 = self.next_placeholder();
                bindings.push(from.clone());
                bindings.push(to.clone());
                let kw = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                format!("{col} {kw} {p1} AND {p2}")
            }
            WhereCondition::Like { column, pattern, negated } => {
                let col = self.escape_identifier(column);
                let p = self.next_placeholder();
                bindings.push(Value::Text(pattern.clone()));
                let kw = if *negated { "NOT LIKE" } else { "LIKE" };
                format!("{col} {kw} {p}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::where_clause::WhereAssembler;
    use rstest::rstest;

    fn select_with_where(kind: DialectKind, build: impl FnOnce(&mut WhereAssembler)) -> (String, Vec<Value>) {
        let engine = DialectEngine::new(kind);
        let mut w = WhereAssembler::new();
        build(&mut w);
        let c = SelectComponents {
            from: "users".to_string(),
            where_: w.nodes().to_vec(),
            ..Default::default()
        };
        engine.build_select(&c).unwrap()
    }

    #[test]
    fn mysql_object_where_scenario_1() {
        let (sql, bindings) = select_with_where(DialectKind::MySql, |w| {
            w.and_map(vec![("status", Value::from("active")), ("role", Value::from("admin"))])
                .unwrap();
        });
        assert_eq!(sql, "SELECT * FROM `users` WHERE (`status` = ? AND `role` = ?)");
        assert_eq!(bindings, vec![Value::from("active"), Value::from("admin")]);
    }

    #[test]
    fn postgres_two_simple_wheres_scenario_2() {
        let (sql, bindings) = select_with_where(DialectKind::PostgreSql, |w| {
            w.and_eq("status", "active").unwrap();
            w.and_op("age", ">", 18).unwrap();
        });
        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"status\" = $1 AND \"age\" > $2");
        assert_eq!(bindings, vec![Value::from("active"), Value::I64(18)]);
    }

    #[test]
    fn mysql_between_scenario_3() {
        let engine = DialectEngine::new(DialectKind::MySql);
        let mut w = WhereAssembler::new();
        w.and_between("price", 100, 500).unwrap();
        let c = SelectComponents {
            from: "products".to_string(),
            where_: w.nodes().to_vec(),
            ..Default::default()
        };
        let (sql, bindings) = engine.build_select(&c).unwrap();
        assert_eq!(sql, "SELECT * FROM `products` WHERE `price` BETWEEN ? AND ?");
        assert_eq!(bindings, vec![Value::I64(100), Value::I64(500)]);
    }

    #[test]
    fn mysql_pagination_scenario_4() {
        let engine = DialectEngine::new(DialectKind::MySql);
        let c = SelectComponents {
            from: "users".to_string(),
            limit: Some(20),
            offset: Some(40),
            ..Default::default()
        };
        let (sql, bindings) = engine.build_select(&c).unwrap();
        assert_eq!(sql, "SELECT * FROM `users` LIMIT 20 OFFSET 40");
        assert!(bindings.is_empty());
    }

    #[test]
    fn postgres_insert_returning_scenario_5() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let c = InsertComponents {
            table: "users".to_string(),
            columns: vec!["name".to_string(), "email".to_string()],
            rows: vec![vec![Value::from("John"), Value::from("j@x")]],
            returning: Some(vec!["id".to_string(), "created_at".to_string()]),
            ..Default::default()
        };
        let (sql, bindings) = engine.build_insert(&c).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2) RETURNING \"id\", \"created_at\""
        );
        assert_eq!(bindings, vec![Value::from("John"), Value::from("j@x")]);
    }

    #[test]
    fn mysql_upsert_scenario_6() {
        let engine = DialectEngine::new(DialectKind::MySql);
        let c = InsertComponents {
            table: "users".to_string(),
            columns: vec!["id".to_string(), "name".to_string(), "email".to_string()],
            rows: vec![vec![Value::I64(1), Value::from("John"), Value::from("j@x")]],
            upsert: Some(UpsertClause {
                conflict_keys: vec!["id".to_string()],
                update_columns: vec![],
            }),
            ..Default::default()
        };
        let (sql, bindings) = engine.build_insert(&c).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `users` (`id`, `name`, `email`) VALUES (?, ?, ?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `email` = VALUES(`email`)"
        );
        assert_eq!(bindings, vec![Value::I64(1), Value::from("John"), Value::from("j@x")]);
    }

    #[rstest]
    #[case(DialectKind::MySql, "`col`")]
    #[case(DialectKind::PostgreSql, "\"col\"")]
    fn identifier_escaping_is_bijective(#[case] kind: DialectKind, #[case] expected: &str) {
        let engine = DialectEngine::new(kind);
        assert_eq!(engine.escape_identifier("col"), expected);
    }

    #[test]
    fn dotted_identifier_quotes_each_segment() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        assert_eq!(engine.escape_identifier("public.users"), "\"public\".\"users\"");
    }

    #[test]
    fn embedded_quote_is_doubled() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        assert_eq!(engine.escape_identifier("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn where_in_empty_collapses_to_false() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let mut w = WhereAssembler::new();
        w.and_in("id", vec![]).unwrap();
        let c = SelectComponents {
            from: "users".to_string(),
            where_: w.nodes().to_vec(),
            ..Default::default()
        };
        let (sql, _) = engine.build_select(&c).unwrap();
        assert!(sql.ends_with("WHERE 1=0"));
    }

    #[test]
    fn where_not_in_empty_collapses_to_true() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let mut w = WhereAssembler::new();
        w.and_not_in("id", vec![]).unwrap();
        let c = SelectComponents {
            from: "users".to_string(),
            where_: w.nodes().to_vec(),
            ..Default::default()
        };
        let (sql, _) = engine.build_select(&c).unwrap();
        assert!(sql.ends_with("WHERE 1=1"));
    }

    #[test]
    fn placeholder_indices_have_no_gaps() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let mut w = WhereAssembler::new();
        w.and_between("price", 1, 2).unwrap();
        w.and_in("id", vec![Value::I64(1), Value::I64(2), Value::I64(3)]).unwrap();
        let c = SelectComponents {
            from: "t".to_string(),
            where_: w.nodes().to_vec(),
            ..Default::default()
        };
        let (sql, bindings) = engine.build_select(&c).unwrap();
        assert_eq!(bindings.len(), 5);
        for i in 1..=5 {
            assert!(sql.contains(&format!("${i}")));
        }
    }

    #[test]
    fn select_missing_from_is_validation_error() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let c = SelectComponents::default();
        assert!(matches!(engine.build_select(&c), Err(Error::MissingComponent("from"))));
    }

    #[test]
    fn delete_without_predicates_or_force_is_rejected() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let c = DeleteComponents {
            table: "users".to_string(),
            ..Default::default()
        };
        assert!(matches!(engine.build_delete(&c), Err(Error::UnsafeDelete)));
    }

    #[test]
    fn delete_without_predicates_with_force_is_allowed() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let c = DeleteComponents {
            table: "users".to_string(),
            force: true,
            ..Default::default()
        };
        let (sql, _) = engine.build_delete(&c).unwrap();
        assert_eq!(sql, "DELETE FROM \"users\"");
    }

    #[test]
    fn string_escaping_doubles_quotes_under_postgres() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        assert_eq!(engine.escape_value(&Value::from("o'brien")), "'o''brien'");
    }

    #[test]
    fn string_escaping_backslash_escapes_under_mysql() {
        let engine = DialectEngine::new(DialectKind::MySql);
        assert_eq!(engine.escape_value(&Value::from("a\\b'c")), "'a\\\\b\\'c'");
    }

    #[test]
    fn boolean_literal_differs_per_dialect() {
        assert_eq!(DialectEngine::new(DialectKind::PostgreSql).escape_value(&Value::Bool(true)), "TRUE");
        assert_eq!(DialectEngine::new(DialectKind::MySql).escape_value(&Value::Bool(true)), "1");
    }

    #[test]
    fn mysql_array_value_renders_as_json_array_literal() {
        let engine = DialectEngine::new(DialectKind::MySql);
        let array = Value::Array(vec![Value::I64(1), Value::I64(2), Value::I64(3)]);
        assert_eq!(engine.escape_value(&array), "'[1,2,3]'");
    }

    #[test]
    fn postgres_array_value_renders_as_array_constructor() {
        let engine = DialectEngine::new(DialectKind::PostgreSql);
        let array = Value::Array(vec![Value::I64(1), Value::I64(2), Value::I64(3)]);
        assert_eq!(engine.escape_value(&array), "ARRAY[1, 2, 3]");
    }
}
