//! Cache document trait and normalized deep equality
//!
//! Change detection is structural: two documents are equal when their
//! serde_json values match after null fields are stripped recursively.
//! A field that is absent and a field that is explicitly null are the
//! same document state, so adding optional fields never produces phantom
//! writes. Per-field hand-written diffs are deliberately avoided.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::hash::Hash;

/// A document that can live in a unit-of-work cache.
pub trait CacheDoc: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Id type, unique within the document's collection.
    type Id: Clone + Eq + Ord + Hash + Display + Send + Sync + Serialize + 'static;

    fn doc_id(&self) -> &Self::Id;
}

/// Strip null object fields recursively so that "absent" and "null"
/// compare equal.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

/// Deep equality of two documents after normalization.
///
/// Serialization failures count as "not equal": the save path will then
/// surface the real error instead of this helper guessing.
pub fn docs_equal<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => normalize(a) == normalize(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    struct Doc {
        id: String,
        rank: f64,
        note: Option<String>,
    }

    #[test]
    fn test_docs_equal_identical() {
        let a = Doc {
            id: "a".into(),
            rank: 1.0,
            note: None,
        };
        assert!(docs_equal(&a, &a.clone()));
    }

    #[test]
    fn test_docs_equal_none_vs_absent() {
        // None serializes as null which normalization strips
        let a = serde_json::json!({ "id": "a", "rank": 1.0, "note": null });
        let b = serde_json::json!({ "id": "a", "rank": 1.0 });
        assert_eq!(normalize(a), normalize(b));
    }

    #[test]
    fn test_docs_equal_detects_field_change() {
        let a = Doc {
            id: "a".into(),
            rank: 1.0,
            note: None,
        };
        let mut b = a.clone();
        b.rank = 2.0;
        assert!(!docs_equal(&a, &b));
    }

    #[test]
    fn test_normalize_nested() {
        let v = serde_json::json!({ "outer": { "keep": 1, "drop": null }, "list": [{ "x": null }] });
        let n = normalize(v);
        assert_eq!(n, serde_json::json!({ "outer": { "keep": 1 }, "list": [{}] }));
    }
}
