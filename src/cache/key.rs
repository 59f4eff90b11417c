//! Cache key construction

use crate::request::BackendQuery;
use crate::Result;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Field holding per-request metadata at every query nesting level
const CONTEXT_FIELD: &str = "context";

/// Serialized form of `query` with every context object removed
///
/// `serde_json::Map` keeps its keys sorted, so two queries that differ only
/// in field order or context produce the same string.
pub fn canonical_query(query: &BackendQuery) -> Result<String> {
    let mut value = serde_json::to_value(query)?;
    strip_context(&mut value);
    Ok(serde_json::to_string(&value)?)
}

/// Hex SHA-256 of [`canonical_query`]
pub fn cache_key(query: &BackendQuery) -> Result<String> {
    let canonical = canonical_query(query)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn strip_context(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };
    map.remove(CONTEXT_FIELD);
    if let Some(data_source) = map.get_mut("dataSource") {
        if let Some(inner) = data_source.get_mut("query") {
            strip_context(inner);
        }
    }
}
