//! Normalization and merge engine
//!
//! Reconciles a raw server response with the current storage. Every top-level
//! key of the response is normalized into a keyed collection and then combined
//! with the existing value under that key according to its [`MergeStrategy`].
//! The result is a complete replacement for storage.

use std::{collections::HashMap, fmt, sync::Arc};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Normalized domain data, partitioned into named lists
pub type Storage = JsonMap<String, JsonValue>;

/// Storage key -> strategy
pub type StrategyTable = HashMap<String, MergeStrategy>;

/// Pluggable normalizer: `(current storage, response, strategies) -> new storage`
pub type NormalizeFn = Arc<dyn Fn(&Storage, &JsonValue, &StrategyTable) -> Storage + Send + Sync>;

const DATA_FIELD: &str = "data";
const PRIMARY_KEY_FIELD: &str = "primaryKey";

/// How new data for a storage key combines with what is already stored
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MergeStrategy {
    #[default]
    Merge,
    Replace,
    /// Unrecognised name, applied as `Merge` with a warning
    Other(String),
}

impl From<String> for MergeStrategy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "merge" => MergeStrategy::Merge,
            "replace" => MergeStrategy::Replace,
            _ => MergeStrategy::Other(value),
        }
    }
}

impl From<&str> for MergeStrategy {
    fn from(value: &str) -> Self {
        MergeStrategy::from(value.to_string())
    }
}

impl From<MergeStrategy> for String {
    fn from(value: MergeStrategy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Merge => f.write_str("merge"),
            MergeStrategy::Replace => f.write_str("replace"),
            MergeStrategy::Other(name) => f.write_str(name),
        }
    }
}

/// Strategy actually applied to a key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolved {
    Merge,
    Replace,
}

fn resolve_strategy(key: &str, strategies: &StrategyTable) -> Resolved {
    match strategies.get(key) {
        None | Some(MergeStrategy::Merge) => Resolved::Merge,
        Some(MergeStrategy::Replace) => Resolved::Replace,
        Some(MergeStrategy::Other(name)) => {
            warn!("Unknown merge strategy '{name}' for key '{key}', falling back to merge");
            Resolved::Merge
        }
    }
}

/// Overlay per-request strategies on the system defaults, request entries win.
pub fn effective_strategies(
    defaults: &StrategyTable,
    overrides: Option<&StrategyTable>,
) -> StrategyTable {
    let mut table = defaults.clone();
    if let Some(overrides) = overrides {
        table.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    table
}

/// The built-in normalizer.
///
/// A non-object response leaves storage unchanged.
pub fn normalize(current: &Storage, response: &JsonValue, strategies: &StrategyTable) -> Storage {
    let mut result = current.clone();

    let JsonValue::Object(entries) = response else {
        warn!("Response is not an object, storage left untouched");
        return result;
    };

    for (key, value) in entries {
        let Some(incoming) = to_collection(key, value) else {
            continue;
        };

        let merged = match resolve_strategy(key, strategies) {
            Resolved::Replace => incoming,
            Resolved::Merge => {
                let existing = result
                    .remove(key)
                    .unwrap_or_else(|| JsonValue::Object(JsonMap::new()));
                deep_merge(existing, incoming)
            }
        };
        result.insert(key.clone(), merged);
    }

    result
}

/// Normalize one response value. `None` means the key is dropped.
fn to_collection(key: &str, value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::Null | JsonValue::String(_) => None,
        JsonValue::Object(object) => match indexed_list(object) {
            Some((items, primary_key)) => Some(JsonValue::Object(index_by(key, items, primary_key))),
            None => Some(value.clone()),
        },
        other => Some(other.clone()),
    }
}

fn indexed_list(object: &JsonMap<String, JsonValue>) -> Option<(&Vec<JsonValue>, &str)> {
    match (object.get(DATA_FIELD), object.get(PRIMARY_KEY_FIELD)) {
        (Some(JsonValue::Array(items)), Some(JsonValue::String(primary_key))) => {
            Some((items, primary_key.as_str()))
        }
        _ => None,
    }
}

fn index_by(key: &str, items: &[JsonValue], primary_key: &str) -> JsonMap<String, JsonValue> {
    let mut collection = JsonMap::new();
    for item in items {
        match item.get(primary_key).and_then(key_string) {
            Some(id) => {
                collection.insert(id, item.clone());
            }
            None => warn!("Item in '{key}' has no usable '{primary_key}', skipped"),
        }
    }
    collection
}

fn key_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Recursive object merge, `incoming` wins field by field.
///
/// Anything that is not an object on both sides, arrays included, is replaced wholesale.
pub fn deep_merge(existing: JsonValue, incoming: JsonValue) -> JsonValue {
    match (existing, incoming) {
        (JsonValue::Object(mut base), JsonValue::Object(patch)) => {
            for (key, value) in patch {
                let merged = match base.remove(&key) {
                    Some(old) => deep_merge(old, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            JsonValue::Object(base)
        }
        (_, incoming) => incoming,
    }
}
