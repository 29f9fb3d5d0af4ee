//! Serde extraction of the flat key space.
//!
//! The flat map is rebuilt into a nested tree first: dotted keys become
//! nested objects and runs of `0..n` indices become arrays. Where a key holds
//! both a scalar and children (a list's joined string next to its indexed
//! entries), the children win.

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use super::error::ConfigError;
use super::value::{Map, Value};

/// Deserializes `data` into `T`.
pub(crate) fn extract<T: DeserializeOwned>(data: &Map) -> Result<T, ConfigError> {
    let tree = unflatten(data);
    serde_json::from_value(tree).map_err(ConfigError::from)
}

/// Rebuilds the nested JSON tree for a flat map.
pub(crate) fn unflatten(data: &Map) -> Json {
    let mut root = serde_json::Map::new();
    for (key, value) in data {
        let segments: Vec<&str> = key.split('.').collect();
        insert(&mut root, &segments, to_json(value));
    }
    arrayify(Json::Object(root))
}

fn insert(node: &mut serde_json::Map<String, Json>, segments: &[&str], value: Json) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        match (node.get_mut(*head), value) {
            (Some(Json::Object(existing)), Json::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.entry(k).or_insert(v);
                }
            }
            // Children already present take precedence over a scalar.
            (Some(Json::Object(_)), _) => {}
            (_, value) => {
                node.insert(head.to_string(), value);
            }
        }
        return;
    }

    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Json::Object(serde_json::Map::new()));
    if !child.is_object() {
        *child = Json::Object(serde_json::Map::new());
    }
    if let Json::Object(child) = child {
        insert(child, rest, value);
    }
}

/// Objects whose keys are exactly `0..n` become arrays.
fn arrayify(value: Json) -> Json {
    match value {
        Json::Object(map) => {
            let is_sequence = !map.is_empty()
                && (0..map.len()).all(|i| map.contains_key(i.to_string().as_str()));
            if is_sequence {
                let mut map = map;
                let items = (0..map.len())
                    .filter_map(|i| map.remove(i.to_string().as_str()))
                    .map(arrayify)
                    .collect();
                Json::Array(items)
            } else {
                Json::Object(map.into_iter().map(|(k, v)| (k, arrayify(v))).collect())
            }
        }
        Json::Array(items) => Json::Array(items.into_iter().map(arrayify).collect()),
        other => other,
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => coerce_value(s),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => match unflatten(map) {
            Json::Object(obj) => Json::Object(obj),
            other => other,
        },
    }
}

/// Coerces string leaves (typically from the environment) to the most
/// specific JSON scalar.
fn coerce_value(s: &str) -> Json {
    if s.eq_ignore_ascii_case("true") {
        return Json::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Json::Bool(false);
    }

    if looks_like_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Json::from(i);
        }
    }

    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Json::Number(n);
            }
        }
    }

    Json::String(s.to_string())
}

fn looks_like_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
