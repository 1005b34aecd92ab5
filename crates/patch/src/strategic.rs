//! Structural (strategic) merge patches.
//!
//! Maps merge recursively and `null` deletes a field. Lists registered in a
//! [`PatchMeta`] merge item-by-item on their merge key: changed items carry only
//! their changed fields plus the key, removed items become
//! `{"$patch": "delete", <key>: <value>}`, and `$setElementOrder/<field>` records
//! the desired item order. All other lists replace wholesale.

use serde_json::{json, Map, Value as Json};

use crate::meta::PatchMeta;

pub const PATCH_DIRECTIVE: &str = "$patch";
pub const DELETE_DIRECTIVE: &str = "delete";
pub const ORDER_PREFIX: &str = "$setElementOrder/";

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DiffOptions {
    /// Fields present in `from` but missing in `to` are left alone.
    pub ignore_deletions: bool,
    /// Only deletions are reported.
    pub ignore_changes: bool,
    /// Emit `$setElementOrder` hints for keyed lists.
    pub emit_order: bool,
}

fn child_path(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn is_delete_directive(item: &Json) -> bool {
    item.get(PATCH_DIRECTIVE).and_then(Json::as_str) == Some(DELETE_DIRECTIVE)
}

/// Diff two maps into a patch that turns `from` into `to`, subject to `opts`.
pub(crate) fn diff_maps(from: &Map<String, Json>, to: &Map<String, Json>, path: &str, meta: &PatchMeta, opts: DiffOptions) -> Map<String, Json> {
    let mut patch = Map::new();
    for (k, tv) in to {
        let child = child_path(path, k);
        match (from.get(k), tv, meta.merge_key(&child)) {
            (None, _, _) => {
                if !opts.ignore_changes {
                    patch.insert(k.clone(), tv.clone());
                }
            }
            (Some(Json::Object(fm)), Json::Object(tm), _) => {
                let sub = diff_maps(fm, tm, &child, meta, opts);
                if !sub.is_empty() {
                    patch.insert(k.clone(), Json::Object(sub));
                }
            }
            (Some(Json::Array(fa)), Json::Array(ta), Some(key)) => {
                match diff_keyed_list(fa, ta, key, &child, meta, opts) {
                    ListPatch::Unchanged => {}
                    ListPatch::Replace(items) => {
                        patch.insert(k.clone(), Json::Array(items));
                    }
                    ListPatch::Keyed { items, order } => {
                        if !items.is_empty() {
                            patch.insert(k.clone(), Json::Array(items));
                        }
                        if let Some(order) = order {
                            patch.insert(format!("{}{}", ORDER_PREFIX, k), Json::Array(order));
                        }
                    }
                }
            }
            (Some(fv), _, _) => {
                if fv != tv && !opts.ignore_changes {
                    patch.insert(k.clone(), tv.clone());
                }
            }
        }
    }
    if !opts.ignore_deletions {
        for k in from.keys() {
            if !to.contains_key(k) {
                patch.insert(k.clone(), Json::Null);
            }
        }
    }
    patch
}

enum ListPatch {
    Unchanged,
    Replace(Vec<Json>),
    Keyed { items: Vec<Json>, order: Option<Vec<Json>> },
}

fn diff_keyed_list(from: &[Json], to: &[Json], key: &str, path: &str, meta: &PatchMeta, opts: DiffOptions) -> ListPatch {
    // Items lacking the merge key make the whole list atomic.
    if !from.iter().chain(to).all(|v| v.get(key).is_some()) {
        if from != to && !opts.ignore_changes {
            return ListPatch::Replace(to.to_vec());
        }
        return ListPatch::Unchanged;
    }

    let mut items = Vec::new();
    for t in to {
        let kv = &t[key];
        match from.iter().find(|f| &f[key] == kv) {
            None => {
                if !opts.ignore_changes {
                    items.push(t.clone());
                }
            }
            Some(f) => match (f.as_object(), t.as_object()) {
                (Some(fm), Some(tm)) => {
                    let mut sub = diff_maps(fm, tm, path, meta, opts);
                    if !sub.is_empty() {
                        sub.insert(key.to_string(), kv.clone());
                        items.push(Json::Object(sub));
                    }
                }
                _ => {
                    if f != t && !opts.ignore_changes {
                        items.push(t.clone());
                    }
                }
            },
        }
    }
    if !opts.ignore_deletions {
        for f in from {
            let kv = &f[key];
            if !to.iter().any(|t| &t[key] == kv) {
                let mut directive = Map::new();
                directive.insert(PATCH_DIRECTIVE.to_string(), Json::String(DELETE_DIRECTIVE.to_string()));
                directive.insert(key.to_string(), kv.clone());
                items.push(Json::Object(directive));
            }
        }
    }

    let order = if opts.emit_order && !opts.ignore_changes {
        let to_keys: Vec<&Json> = to.iter().map(|t| &t[key]).collect();
        let from_common: Vec<&Json> = from.iter().map(|f| &f[key]).filter(|k| to_keys.contains(k)).collect();
        let to_common: Vec<&Json> = to_keys.iter().copied().filter(|k| from_common.contains(k)).collect();
        if !items.is_empty() || from_common != to_common {
            Some(to_keys.into_iter().map(|kv| json!({ key: kv })).collect())
        } else {
            None
        }
    } else {
        None
    };

    if items.is_empty() && order.is_none() {
        ListPatch::Unchanged
    } else {
        ListPatch::Keyed { items, order }
    }
}

/// Combine a deletions-only patch with a changes patch.
///
/// A deletions-only patch never replaces a list, so a list on both sides is a
/// keyed item list and the items concatenate, deletions first.
pub(crate) fn merge_patches(mut base: Map<String, Json>, overlay: Map<String, Json>) -> Map<String, Json> {
    for (k, ov) in overlay {
        let merged = match (base.remove(&k), ov) {
            (Some(Json::Object(bm)), Json::Object(om)) => Json::Object(merge_patches(bm, om)),
            (Some(Json::Array(mut ba)), Json::Array(oa)) => {
                ba.extend(oa);
                Json::Array(ba)
            }
            (_, ov) => ov,
        };
        base.insert(k, merged);
    }
    base
}

/// Apply a strategic patch to `target`.
pub fn apply(target: &Json, patch: &Json, meta: &PatchMeta) -> Json {
    match (target, patch) {
        (Json::Object(tm), Json::Object(pm)) => {
            let mut out = tm.clone();
            apply_map(&mut out, pm, "", meta);
            Json::Object(out)
        }
        (_, Json::Object(pm)) => {
            let mut out = Map::new();
            apply_map(&mut out, pm, "", meta);
            Json::Object(out)
        }
        (_, other) => other.clone(),
    }
}

fn apply_map(target: &mut Map<String, Json>, patch: &Map<String, Json>, path: &str, meta: &PatchMeta) {
    let mut orders = Vec::new();
    for (k, pv) in patch {
        if let Some(field) = k.strip_prefix(ORDER_PREFIX) {
            orders.push((field, pv));
            continue;
        }
        if k == PATCH_DIRECTIVE {
            continue;
        }
        let child = child_path(path, k);
        match pv {
            Json::Null => {
                target.remove(k);
            }
            Json::Object(pm) => match target.get_mut(k) {
                Some(Json::Object(tm)) => apply_map(tm, pm, &child, meta),
                _ => {
                    let mut fresh = Map::new();
                    apply_map(&mut fresh, pm, &child, meta);
                    target.insert(k.clone(), Json::Object(fresh));
                }
            },
            Json::Array(items) => match meta.merge_key(&child) {
                Some(key) if items.iter().all(|i| i.get(key).is_some()) => {
                    let mut list = match target.remove(k) {
                        Some(Json::Array(list)) => list,
                        _ => Vec::new(),
                    };
                    merge_keyed(&mut list, items, key, &child, meta);
                    target.insert(k.clone(), Json::Array(list));
                }
                _ => {
                    target.insert(k.clone(), pv.clone());
                }
            },
            other => {
                target.insert(k.clone(), other.clone());
            }
        }
    }
    for (field, order) in orders {
        let key = meta.merge_key(&child_path(path, field));
        if let (Some(key), Some(Json::Array(list)), Json::Array(order)) = (key, target.get_mut(field), order) {
            reorder(list, order, key);
        }
    }
}

fn merge_keyed(list: &mut Vec<Json>, items: &[Json], key: &str, path: &str, meta: &PatchMeta) {
    for item in items {
        let kv = &item[key];
        if is_delete_directive(item) {
            list.retain(|e| &e[key] != kv);
            continue;
        }
        let Some(im) = item.as_object() else { continue };
        match list.iter_mut().find(|e| &e[key] == kv) {
            Some(Json::Object(em)) => apply_map(em, im, path, meta),
            _ => {
                let mut fresh = Map::new();
                apply_map(&mut fresh, im, path, meta);
                list.push(Json::Object(fresh));
            }
        }
    }
}

/// Stable reorder by position in `order`; items not listed keep their relative order at the end.
fn reorder(list: &mut [Json], order: &[Json], key: &str) {
    let rank = |v: &Json| order.iter().position(|o| o.get(key) == v.get(key)).unwrap_or(order.len());
    list.sort_by_key(|v| rank(v));
}

/// Three-way strategic patch: deletions from `original`→`modified`, changes and
/// additions from `current`→`modified`. Fields only `current` carries are kept.
pub fn three_way(original: &Map<String, Json>, modified: &Map<String, Json>, current: &Map<String, Json>, meta: &PatchMeta) -> Map<String, Json> {
    let deletions = diff_maps(original, modified, "", meta, DiffOptions { ignore_changes: true, ..Default::default() });
    let delta = diff_maps(current, modified, "", meta, DiffOptions { ignore_deletions: true, emit_order: true, ..Default::default() });
    merge_patches(deletions, delta)
}

/// Two-way patch without order hints; keyed lists compare as sets.
pub fn two_way(from: &Map<String, Json>, to: &Map<String, Json>, meta: &PatchMeta) -> Map<String, Json> {
    diff_maps(from, to, "", meta, DiffOptions::default())
}
