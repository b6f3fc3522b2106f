//! The structured intermediate representation the dialect engine renders.
//!
//! Query builders accumulate one of these; the dialect engine never sees a
//! builder, only its finished `Components` record.

use crate::value::Value;
use crate::where_clause::WhereNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinType,
    pub table: String,
    pub alias: Option<String>,
    /// Empty for `CROSS JOIN`, which emits no `ON` clause.
    pub condition: String,
    pub bindings: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByEntry {
    pub column: String,
    pub direction: OrderDirection,
    /// When set, emitted verbatim instead of `escape(column) direction`.
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    pub condition: String,
    pub bindings: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectComponents {
    pub columns: Vec<String>,
    pub distinct: bool,
    pub from: String,
    pub from_alias: Option<String>,
    pub joins: Vec<Join>,
    pub where_: Vec<WhereNode>,
    pub group_by: Vec<String>,
    pub having: Option<Having>,
    pub order_by: Vec<OrderByEntry>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertClause {
    pub conflict_keys: Vec<String>,
    /// Empty means `DO NOTHING` under PostgreSQL; under MySQL every
    /// non-key column is always updated so this is ignored there.
    pub update_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertComponents {
    pub table: String,
    /// Shared across every row, in declaration order.
    pub columns: Vec<String>,
    /// Row-major; each inner `Vec` has the same length as `columns`.
    pub rows: Vec<Vec<Value>>,
    pub returning: Option<Vec<String>>,
    /// MySQL-only: rewrites `INSERT INTO` to `INSERT IGNORE INTO`.
    pub ignore: bool,
    pub upsert: Option<UpsertClause>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateComponents {
    pub table: String,
    /// Ordered, mergeable across multiple `set` calls (last write wins per key).
    pub data: Vec<(String, Value)>,
    pub where_: Vec<WhereNode>,
    pub returning: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteComponents {
    pub table: String,
    pub where_: Vec<WhereNode>,
    pub returning: Option<Vec<String>>,
    pub force: bool,
}
