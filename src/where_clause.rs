//! The where assembler: accumulates predicate nodes in insertion order and
//! renders them as normalized condition fragments for the dialect engine.
//!
//! Rust has no keyword-free spelling of `where`, so the fluent vocabulary
//! here follows the `and_where_*` / `or_where_*` convention widely used by
//! query-builder crates instead of a bare `where(...)` overload set;
//! semantics (conjunction tags, variant set, "first conjunction is
//! ignored at render time") are unaffected by the rename.

use crate::identifier::validate_identifier;
use crate::value::Value;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhereCondition {
    Simple {
        column: String,
        op: String,
        value: Value,
    },
    /// Key/value pairs rendered as `=`-equality, ANDed together.
    Object(Vec<(String, Value)>),
    Raw {
        sql: String,
        bindings: Vec<Value>,
    },
    Null {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        column: String,
        from: Value,
        to: Value,
        negated: bool,
    },
    Like {
        column: String,
        pattern: String,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereNode {
    pub conjunction: Conjunction,
    pub condition: WhereCondition,
}

/// Accumulates predicate nodes. Cheap to `clone()` — it's a deep copy of an
/// owned `Vec`, so mutating a clone never affects the original.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereAssembler {
    nodes: Vec<WhereNode>,
}

impl WhereAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[WhereNode] {
        &self.nodes
    }

    fn push(&mut self, conjunction: Conjunction, condition: WhereCondition) {
        self.nodes.push(WhereNode {
            conjunction,
            condition,
        });
    }

    pub fn and_eq(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.and_op(column, "=", value)
    }

    pub fn or_eq(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.or_op(column, "=", value)
    }

    pub fn and_op(
        &mut self,
        column: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(
            Conjunction::And,
            WhereCondition::Simple {
                column,
                op: op.into(),
                value: value.into(),
            },
        );
        Ok(())
    }

    pub fn or_op(
        &mut self,
        column: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(
            Conjunction::Or,
            WhereCondition::Simple {
                column,
                op: op.into(),
                value: value.into(),
            },
        );
        Ok(())
    }

    pub fn and_map<K, V, I>(&mut self, pairs: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.push_map(Conjunction::And, pairs)
    }

    pub fn or_map<K, V, I>(&mut self, pairs: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.push_map(Conjunction::Or, pairs)
    }

    fn push_map<K, V, I>(&mut self, conjunction: Conjunction, pairs: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries = Vec::new();
        for (k, v) in pairs {
            let k = k.into();
            validate_identifier(&k)?;
            entries.push((k, v.into()));
        }
        self.push(conjunction, WhereCondition::Object(entries));
        Ok(())
    }

    pub fn and_null(&mut self, column: impl Into<String>) -> Result<()> {
        self.push_null(Conjunction::And, column, false)
    }
    pub fn or_null(&mut self, column: impl Into<String>) -> Result<()> {
        self.push_null(Conjunction::Or, column, false)
    }
    pub fn and_not_null(&mut self, column: impl Into<String>) -> Result<()> {
        self.push_null(Conjunction::And, column, true)
    }
    pub fn or_not_null(&mut self, column: impl Into<String>) -> Result<()> {
        self.push_null(Conjunction::Or, column, true)
    }

    fn push_null(&mut self, conjunction: Conjunction, column: impl Into<String>, negated: bool) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(conjunction, WhereCondition::Null { column, negated });
        Ok(())
    }

    pub fn and_in(&mut self, column: impl Into<String>, values: Vec<Value>) -> Result<()> {
        self.push_in(Conjunction::And, column, values, false)
    }
    pub fn or_in(&mut self, column: impl Into<String>, values: Vec<Value>) -> Result<()> {
        self.push_in(Conjunction::Or, column, values, false)
    }
    pub fn and_not_in(&mut self, column: impl Into<String>, values: Vec<Value>) -> Result<()> {
        self.push_in(Conjunction::And, column, values, true)
    }
    pub fn or_not_in(&mut self, column: impl Into<String>, values: Vec<Value>) -> Result<()> {
        self.push_in(Conjunction::Or, column, values, true)
    }

    fn push_in(
        &mut self,
        conjunction: Conjunction,
        column: impl Into<String>,
        values: Vec<Value>,
        negated: bool,
    ) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(
            conjunction,
            WhereCondition::In {
                column,
                values,
                negated,
            },
        );
        Ok(())
    }

    pub fn and_between(
        &mut self,
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Result<()> {
        self.push_between(Conjunction::And, column, from, to, false)
    }
    pub fn or_between(
        &mut self,
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Result<()> {
        self.push_between(Conjunction::Or, column, from, to, false)
    }
    pub fn and_not_between(
        &mut self,
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Result<()> {
        self.push_between(Conjunction::And, column, from, to, true)
    }
    pub fn or_not_between(
        &mut self,
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Result<()> {
        self.push_between(Conjunction::Or, column, from, to, true)
    }

    fn push_between(
        &mut self,
        conjunction: Conjunction,
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
        negated: bool,
    ) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(
            conjunction,
            WhereCondition::Between {
                column,
                from: from.into(),
                to: to.into(),
                negated,
            },
        );
        Ok(())
    }

    pub fn and_like(&mut self, column: impl Into<String>, pattern: impl Into<String>) -> Result<()> {
        self.push_like(Conjunction::And, column, pattern, false)
    }
    pub fn or_like(&mut self, column: impl Into<String>, pattern: impl Into<String>) -> Result<()> {
        self.push_like(Conjunction::Or, column, pattern, false)
    }
    pub fn and_not_like(&mut self, column: impl Into<String>, pattern: impl Into<String>) -> Result<()> {
        self.push_like(Conjunction::And, column, pattern, true)
    }
    pub fn or_not_like(&mut self, column: impl Into<String>, pattern: impl Into<String>) -> Result<()> {
        self.push_like(Conjunction::Or, column, pattern, true)
    }

    fn push_like(
        &mut self,
        conjunction: Conjunction,
        column: impl Into<String>,
        pattern: impl Into<String>,
        negated: bool,
    ) -> Result<()> {
        let column = column.into();
        validate_identifier(&column)?;
        self.push(
            conjunction,
            WhereCondition::Like {
                column,
                pattern: pattern.into(),
                negated,
            },
        );
        Ok(())
    }

    /// Raw SQL bypasses identifier validation; it is the caller's
    /// responsibility.
    pub fn and_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) {
        self.push(Conjunction::And, WhereCondition::Raw { sql: sql.into(), bindings });
    }
    pub fn or_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) {
        self.push(Conjunction::Or, WhereCondition::Raw { sql: sql.into(), bindings });
    }
}

/// Surfaced so call sites that need to report "no predicates present"
/// (unforced DELETE, empty UPDATE caveats, etc.) don't have to reach into
/// `nodes()` directly.
pub fn require_force_for_unsafe_delete(assembler: &WhereAssembler, force: bool) -> Result<()> {
    if assembler.is_empty() && !force {
        return Err(Error::UnsafeDelete);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_in_empty_collapses_handled_at_render_not_assembly() {
        let mut w = WhereAssembler::new();
        w.and_in("id", vec![]).unwrap();
        assert_eq!(w.nodes().len(), 1);
    }

    #[test]
    fn rejects_invalid_column_names() {
        let mut w = WhereAssembler::new();
        assert!(w.and_eq("bad col", 1).is_err());
    }

    #[test]
    fn raw_bypasses_identifier_validation() {
        let mut w = WhereAssembler::new();
        w.and_raw("lower(name) = ?", vec![Value::from("x")]);
        assert_eq!(w.nodes().len(), 1);
    }

    #[test]
    fn clone_is_independent() {
        let mut w = WhereAssembler::new();
        w.and_eq("a", 1).unwrap();
        let mut cloned = w.clone();
        cloned.and_eq("b", 2).unwrap();
        assert_eq!(w.nodes().len(), 1);
        assert_eq!(cloned.nodes().len(), 2);
    }

    #[test]
    fn unforced_delete_without_predicates_is_rejected() {
        let w = WhereAssembler::new();
        assert!(require_force_for_unsafe_delete(&w, false).is_err());
        assert!(require_force_for_unsafe_delete(&w, true).is_ok());
    }
}
