//! JSON normalization applied before diffing.

use serde_json::Value as Json;

/// Metadata the server owns; never part of a declared configuration.
const SERVER_METADATA: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "selfLink",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
];

/// Drop every null-valued object field, recursively. Null array elements are kept.
pub fn delete_nulls(v: Json) -> Json {
    match v {
        Json::Object(map) => Json::Object(
            map.into_iter()
                .filter(|(_, vv)| !vv.is_null())
                .map(|(k, vv)| (k, delete_nulls(vv)))
                .collect(),
        ),
        Json::Array(items) => Json::Array(items.into_iter().map(delete_nulls).collect()),
        other => other,
    }
}

/// Remove server-populated metadata and the status stanza.
pub fn strip_server_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for k in SERVER_METADATA {
            meta.remove(*k);
        }
    }
    // Status is server-populated; ignore it during diffs
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_nulls_recurses_into_objects_and_arrays() {
        let v = json!({
            "a": null,
            "b": { "c": null, "d": 1 },
            "e": [ { "f": null, "g": 2 }, null ]
        });
        assert_eq!(delete_nulls(v), json!({ "b": { "d": 1 }, "e": [ { "g": 2 }, null ] }));
    }

    #[test]
    fn strip_server_fields_prunes_common_fields() {
        let mut v = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "uid": "0b0c",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        strip_server_fields(&mut v);
        assert_eq!(v, json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "x", "namespace": "ns" },
            "data": { "k": "v" }
        }));
    }
}
