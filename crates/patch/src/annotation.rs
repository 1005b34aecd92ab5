//! Last-applied configuration annotation.

use std::collections::BTreeMap;

use kube::Resource;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::normalize::{delete_nulls, strip_server_fields};
use crate::{PatchError, EMPTY_OBJECT};

/// Reads and writes the annotation holding a resource's last declared configuration.
#[derive(Debug, Clone)]
pub struct Annotator {
    key: String,
}

pub const DEFAULT_KEY: &str = "workload.dmall.com/last-applied";

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl Annotator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The stored annotation, or `{}` when the resource has none.
    pub fn original_configuration(&self, obj: &Json) -> Vec<u8> {
        obj.get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(&self.key))
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_else(|| EMPTY_OBJECT.to_vec())
    }

    /// Serialization of `obj` as a declared configuration: nulls, server metadata, status and
    /// the annotation itself removed. Always carries a `metadata` object, so an empty
    /// annotation and an absent one serialize the same way.
    ///
    /// With `include_annotation`, the result additionally carries the annotation set to the
    /// configuration without it.
    pub fn modified_configuration(&self, obj: &Json, include_annotation: bool) -> Result<Vec<u8>, PatchError> {
        let mut v = delete_nulls(obj.clone());
        strip_server_fields(&mut v);
        let root = v.as_object_mut().ok_or(PatchError::NotAnObject("resource"))?;
        let meta = root
            .entry("metadata")
            .or_insert_with(|| Json::Object(Map::new()))
            .as_object_mut()
            .ok_or(PatchError::NotAnObject("metadata"))?;
        let mut drop_annotations = false;
        if let Some(annots) = meta.get_mut("annotations").and_then(Json::as_object_mut) {
            annots.remove(&self.key);
            drop_annotations = annots.is_empty();
        }
        if drop_annotations {
            meta.remove("annotations");
        }

        let modified = serde_json::to_vec(&v).map_err(PatchError::encode("modified configuration"))?;
        if !include_annotation {
            return Ok(modified);
        }

        let text = String::from_utf8(modified)?;
        if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
            let annots = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
            if let Some(annots) = annots.as_object_mut() {
                annots.insert(self.key.clone(), Json::String(text));
            }
        }
        serde_json::to_vec(&v).map_err(PatchError::encode("annotated configuration"))
    }

    /// Record the current declared configuration of `obj` on its own annotation map.
    pub fn set_last_applied<K>(&self, obj: &mut K) -> Result<(), PatchError>
    where
        K: Resource + Serialize,
    {
        let v = serde_json::to_value(&*obj).map_err(PatchError::encode("resource"))?;
        let modified = String::from_utf8(self.modified_configuration(&v, false)?)?;
        obj.meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(self.key.clone(), modified);
        Ok(())
    }
}
