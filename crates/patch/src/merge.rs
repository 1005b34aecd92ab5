//! RFC 7396 JSON merge patches for untyped resources.

use serde_json::{Map, Value as Json};

use crate::meta::NONE;
use crate::strategic::{diff_maps, merge_patches, DiffOptions};

/// Three-way merge patch: deletions from `original`→`modified` plus changes and
/// additions from `current`→`modified`. Lists always replace wholesale.
pub fn three_way(original: &Map<String, Json>, modified: &Map<String, Json>, current: &Map<String, Json>) -> Map<String, Json> {
    let deletions = diff_maps(original, modified, "", &NONE, DiffOptions { ignore_changes: true, ..Default::default() });
    let delta = diff_maps(current, modified, "", &NONE, DiffOptions { ignore_deletions: true, ..Default::default() });
    merge_patches(deletions, delta)
}

/// Apply a merge patch (RFC 7396 section 2).
pub fn apply(target: &Json, patch: &Json) -> Json {
    let Json::Object(pm) = patch else { return patch.clone() };
    let mut out = match target {
        Json::Object(tm) => tm.clone(),
        _ => Map::new(),
    };
    for (k, pv) in pm {
        if pv.is_null() {
            out.remove(k);
        } else {
            let merged = apply(out.get(k).unwrap_or(&Json::Null), pv);
            out.insert(k.clone(), merged);
        }
    }
    Json::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Json) -> Map<String, Json> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn lists_replace_wholesale() {
        let original = obj(json!({ "spec": { "hosts": ["a", "b"] } }));
        let modified = obj(json!({ "spec": { "hosts": ["b", "a"] } }));
        let patch = three_way(&original, &modified, &original);
        assert_eq!(Json::Object(patch), json!({ "spec": { "hosts": ["b", "a"] } }));
    }

    #[test]
    fn only_declared_fields_are_deleted() {
        let original = obj(json!({ "data": { "a": "1", "b": "2" } }));
        let modified = obj(json!({ "data": { "a": "1" } }));
        let current = obj(json!({ "data": { "a": "1", "b": "2", "c": "3" } }));
        let patch = three_way(&original, &modified, &current);
        assert_eq!(Json::Object(patch.clone()), json!({ "data": { "b": null } }));
        let applied = apply(&Json::Object(current), &Json::Object(patch));
        assert_eq!(applied, json!({ "data": { "a": "1", "c": "3" } }));
    }

    #[test]
    fn no_change_is_empty() {
        let doc = obj(json!({ "spec": { "x": [1, 2], "y": { "z": true } } }));
        assert!(three_way(&doc, &doc, &doc).is_empty());
    }
}
