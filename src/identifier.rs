//! Identifier validation shared by every builder entry point.
//!
//! Table names, column names, group-by columns, and savepoint names are
//! all checked against the same pattern before they ever reach the dialect
//! engine. Raw SQL fragments (`where_raw`, `order_by` with `raw: true`,
//! dotted/aliased `select()` expressions) bypass this and remain the
//! caller's responsibility.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Validates a single identifier segment. Dotted `schema.table` names must
/// be split by the caller first; this only ever checks one segment.
pub fn validate_identifier(name: &str) -> Result<&str> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Validates every segment of a possibly-qualified `schema.table` name.
pub fn validate_qualified_identifier(name: &str) -> Result<&str> {
    for segment in name.split('.') {
        validate_identifier(segment)?;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("users")]
    #[case("_private")]
    #[case("col_1")]
    fn accepts_valid_identifiers(#[case] name: &str) {
        assert!(validate_identifier(name).is_ok());
    }

    #[rstest]
    #[case("1users")]
    #[case("user name")]
    #[case("users;drop table x")]
    #[case("")]
    #[case("user-name")]
    fn rejects_invalid_identifiers(#[case] name: &str) {
        assert!(validate_identifier(name).is_err());
    }

    #[test]
    fn qualified_identifier_checks_every_segment() {
        assert!(validate_qualified_identifier("public.users").is_ok());
        assert!(validate_qualified_identifier("public.user name").is_err());
    }
}
