//! Best-effort table-name extraction for write-triggered cache invalidation.
//!
//! This is deliberately not a SQL parser: quoted
//! identifiers containing whitespace or dots are not handled, and the
//! regex set only looks for `FROM|JOIN|INTO|UPDATE|DELETE FROM <name>`.
//! Good enough to drive `table:<name>` / `*<name>*` invalidation patterns;
//! anything fancier belongs in a real parser, which is out of scope.

use regex::Regex;
use std::sync::LazyLock;

static TABLE_REFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bFROM\s+`?\"?([A-Za-z_][A-Za-z0-9_]*)`?\"?").unwrap(),
        Regex::new(r"(?i)\bJOIN\s+`?\"?([A-Za-z_][A-Za-z0-9_]*)`?\"?").unwrap(),
        Regex::new(r"(?i)\bINTO\s+`?\"?([A-Za-z_][A-Za-z0-9_]*)`?\"?").unwrap(),
        Regex::new(r"(?i)\bUPDATE\s+`?\"?([A-Za-z_][A-Za-z0-9_]*)`?\"?").unwrap(),
        Regex::new(r"(?i)\bTABLE\s+`?\"?([A-Za-z_][A-Za-z0-9_]*)`?\"?").unwrap(),
    ]
});

/// Extracts lowercase table identifiers referenced by a write statement.
/// Deduplicated, insertion order preserved.
pub fn extract_table_names(sql: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for re in TABLE_REFS.iter() {
        for cap in re.captures_iter(sql) {
            let name = cap[1].to_ascii_lowercase();
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
    }
    out
}

/// The two invalidation patterns derived from an extracted table name.
pub fn patterns_for_table(table: &str) -> (String, String) {
    (format!("table:{table}"), format!("*{table}*"))
}
