//! Key Module
//!
//! Namespacing rules for record, lookup and counter keys.

use crate::error::{KvError, Result};

/// Sub-namespace holding secondary index hashes.
pub const LOOKUP_SEGMENT: &str = "lookup";

/// Name of the per-prefix sequence counter.
pub const SEQUENCE_SEGMENT: &str = "sequence";

/// Joins a namespace and key as `<prefix>:<key>`.
pub fn namespaced(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Effective key: an explicit prefix wins over the default namespace, and
/// without either the key is used as given.
pub fn resolve(key: &str, prefix: Option<&str>, default_prefix: Option<&str>) -> String {
    match prefix.or(default_prefix).filter(|p| !p.is_empty()) {
        Some(prefix) => namespaced(prefix, key),
        None => key.to_string(),
    }
}

/// Fails with `ReservedKey` when a record would land on a counter.
pub fn ensure_writable(full_key: &str) -> Result<()> {
    if is_counter(full_key) {
        return Err(KvError::ReservedKey(full_key.to_string()));
    }
    Ok(())
}

/// Strips `<prefix>:` from a stored key, if present.
pub fn strip<'a>(key: &'a str, prefix: Option<&str>) -> &'a str {
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key),
        None => key,
    }
}

/// Hash mapping index keys to overall keys: `<prefix>:lookup:<indexName>`.
pub fn lookup_key(prefix: &str, index_name: &str) -> String {
    format!("{}:{}:{}", prefix, LOOKUP_SEGMENT, index_name)
}

/// Counter used for sequence primary keys: `<prefix>:sequence`.
pub fn sequence_key(prefix: &str) -> String {
    namespaced(prefix, SEQUENCE_SEGMENT)
}

/// True when `key` is the sequence counter of some namespace.
///
/// Counters are plain integers and cannot be told apart from records by
/// shape, so the store refuses to write records under these names and scans
/// skip them. Lookup hashes need no name check since scans only return
/// string values.
pub fn is_counter(key: &str) -> bool {
    key.strip_suffix(SEQUENCE_SEGMENT)
        .is_some_and(|head| head.len() > 1 && head.ends_with(':'))
}
