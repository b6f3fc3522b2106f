//! `fingerprint(sql, bindings) = prefix + hex(sha256(sql + canonical-json(bindings)))[:16]`

use crate::value::{Value, canonical_json};
use sha2::{Digest, Sha256};

pub fn fingerprint(prefix: &str, sql: &str, bindings: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update(canonical_json(bindings).as_bytes());
    let digest = hasher.finalize();
    let short = hex::encode(digest)[..16].to_string();
    format!("{prefix}{short}")
}
