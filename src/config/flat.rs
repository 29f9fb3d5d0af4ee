//! Key-space flattening, deep merge and change detection.

use super::value::{Map, Value};

/// Flattens a nested map into dot-path keys.
///
/// Lists contribute both a comma-joined scalar at their own key and indexed
/// children (`hosts.0`, `hosts.1`, ...), so scalar readers and structured
/// binders each find the shape they expect.
pub fn flatten(tree: Map) -> Map {
    let mut out = Map::new();
    for (key, value) in tree {
        flatten_into(key, value, &mut out);
    }
    out
}

fn flatten_into(prefix: String, value: Value, out: &mut Map) {
    match value {
        Value::Map(map) => {
            for (key, child) in map {
                flatten_into(join_keys(&prefix, &key), child, out);
            }
        }
        Value::List(items) => {
            let joined = Value::List(items.clone()).to_string();
            for (i, item) in items.into_iter().enumerate() {
                flatten_into(format!("{prefix}.{i}"), item, out);
            }
            out.insert(prefix, Value::String(joined));
        }
        scalar => {
            out.insert(prefix, scalar);
        }
    }
}

fn join_keys(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Merges `overlay` into `base`, with `overlay` taking precedence.
///
/// Maps present on both sides are merged recursively; any other value in
/// `overlay` replaces the one in `base`. Sibling keys are preserved.
pub fn deep_merge(base: &mut Map, overlay: Map) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Map(base_map)), Value::Map(overlay_map)) => {
                deep_merge(base_map, overlay_map);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Returns the entries of `new` whose value differs from `old`.
///
/// Keys missing from `old` count as changed. Keys removed in `new` are not
/// reported.
pub fn diff(old: &Map, new: &Map) -> Map {
    new.iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(entries: &[(&str, Value)]) -> Map {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_flatten_nested_maps() {
        let tree = map(&[(
            "server",
            Value::Map(map(&[
                ("host", Value::from("localhost")),
                ("port", Value::Int(8080)),
            ])),
        )]);
        let flat = flatten(tree);
        assert_eq!(flat["server.host"], Value::from("localhost"));
        assert_eq!(flat["server.port"], Value::Int(8080));
        assert!(!flat.contains_key("server"));
    }

    #[test]
    fn test_flatten_list_has_joined_and_indexed_keys() {
        let tree = map(&[("hosts", Value::from(vec!["a", "b"]))]);
        let flat = flatten(tree);
        assert_eq!(flat["hosts"], Value::from("a,b"));
        assert_eq!(flat["hosts.0"], Value::from("a"));
        assert_eq!(flat["hosts.1"], Value::from("b"));
    }

    #[test]
    fn test_flatten_list_of_maps() {
        let tree = map(&[(
            "servers",
            Value::List(vec![Value::Map(map(&[("host", Value::from("a"))]))]),
        )]);
        let flat = flatten(tree);
        assert_eq!(flat["servers.0.host"], Value::from("a"));
        assert!(flat.contains_key("servers"));
    }

    #[test]
    fn test_deep_merge_is_non_destructive() {
        let mut base = map(&[("a", Value::Map(map(&[("x", Value::Int(1))])))]);
        deep_merge(
            &mut base,
            map(&[("a", Value::Map(map(&[("y", Value::Int(2))])))]),
        );
        assert_eq!(
            base,
            map(&[(
                "a",
                Value::Map(map(&[("x", Value::Int(1)), ("y", Value::Int(2))]))
            )])
        );
    }

    #[test]
    fn test_deep_merge_overlay_wins_on_leaf() {
        let mut base = map(&[("db.host", Value::from("a"))]);
        deep_merge(&mut base, map(&[("db.host", Value::from("b"))]));
        assert_eq!(base["db.host"], Value::from("b"));
    }

    #[test]
    fn test_deep_merge_scalar_replaces_map() {
        let mut base = map(&[("a", Value::Map(map(&[("x", Value::Int(1))])))]);
        deep_merge(&mut base, map(&[("a", Value::Int(3))]));
        assert_eq!(base["a"], Value::Int(3));
    }

    #[test]
    fn test_diff_reports_changed_and_added() {
        let old = map(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("gone", Value::Null)]);
        let new = map(&[("a", Value::Int(1)), ("b", Value::Int(3)), ("c", Value::Int(4))]);
        let changed = diff(&old, &new);
        assert_eq!(changed, map(&[("b", Value::Int(3)), ("c", Value::Int(4))]));
    }

    #[test]
    fn test_diff_of_identical_maps_is_empty() {
        let m = map(&[("a", Value::from("x"))]);
        assert!(diff(&m, &m).is_empty());
    }

    proptest! {
        #[test]
        fn merge_of_disjoint_maps_is_order_independent(
            left in proptest::collection::btree_map("[a-m]{1,4}", any::<i64>(), 0..8),
            right in proptest::collection::btree_map("[n-z]{1,4}", any::<i64>(), 0..8),
        ) {
            let left: Map = left.into_iter().map(|(k, v)| (k, Value::Int(v))).collect();
            let right: Map = right.into_iter().map(|(k, v)| (k, Value::Int(v))).collect();

            let mut ab = left.clone();
            deep_merge(&mut ab, right.clone());
            let mut ba = right.clone();
            deep_merge(&mut ba, left.clone());

            prop_assert_eq!(&ab, &ba);
            prop_assert_eq!(ab.len(), left.len() + right.len());
        }

        #[test]
        fn merge_overlay_always_wins(key in "[a-z]{1,6}", a in any::<i64>(), b in any::<i64>()) {
            let mut base = Map::from([(key.clone(), Value::Int(a))]);
            deep_merge(&mut base, Map::from([(key.clone(), Value::Int(b))]));
            prop_assert_eq!(&base[&key], &Value::Int(b));
        }
    }
}
