//! Three-way patch calculation between a live resource and its desired form.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::annotation::Annotator;
use crate::normalize::delete_nulls;
use crate::{merge, strategic, DiffStrategy, PatchError, EMPTY_OBJECT};

/// A computed patch together with the three inputs it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
    pub patch: Vec<u8>,
    pub current: Vec<u8>,
    pub modified: Vec<u8>,
    pub original: Vec<u8>,
}

impl PatchResult {
    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool { self.patch == EMPTY_OBJECT }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.patch))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchCalculator {
    annotator: Annotator,
}

impl PatchCalculator {
    pub fn new(annotator: Annotator) -> Self { Self { annotator } }

    pub fn annotator(&self) -> &Annotator { &self.annotator }

    /// Patch that moves `current` to `desired` without touching fields neither side declared.
    pub fn calculate<K: Serialize>(&self, current: &K, desired: &K, strategy: DiffStrategy) -> Result<PatchResult, PatchError> {
        let current = serde_json::to_value(current).map_err(PatchError::encode("current resource"))?;
        let desired = serde_json::to_value(desired).map_err(PatchError::encode("desired resource"))?;
        self.calculate_json(&current, &desired, strategy)
    }

    pub fn calculate_json(&self, current: &Json, desired: &Json, strategy: DiffStrategy) -> Result<PatchResult, PatchError> {
        let current = delete_nulls(current.clone());
        let desired = delete_nulls(desired.clone());

        let original = self.annotator.original_configuration(&current);
        let modified = self.annotator.modified_configuration(&desired, false)?;

        let original_map = as_map(&original, "original configuration")?;
        let modified_map = as_map(&modified, "modified configuration")?;
        let current_map = current.as_object().ok_or(PatchError::NotAnObject("current resource"))?;

        // Both strategies are stabilized by diffing current against its patched form, which
        // collapses order hints and deletions of fields that are already gone.
        let (raw, patch) = match strategy {
            DiffStrategy::Strategic(meta) => {
                let raw = strategic::three_way(&original_map, &modified_map, current_map, meta);
                let stable = match strategic::apply(&current, &Json::Object(raw.clone()), meta) {
                    Json::Object(patched) => strategic::two_way(current_map, &patched, meta),
                    _ => raw.clone(),
                };
                (raw, stable)
            }
            DiffStrategy::JsonMerge => {
                let raw = merge::three_way(&original_map, &modified_map, current_map);
                let stable = match merge::apply(&current, &Json::Object(raw.clone())) {
                    Json::Object(patched) => merge::three_way(current_map, &patched, current_map),
                    _ => raw.clone(),
                };
                (raw, stable)
            }
        };
        if patch.is_empty() && !raw.is_empty() {
            debug!(hints = raw.len(), "patch collapsed to no-op");
            metrics::counter!("patch_stabilized_total", 1u64);
        }

        Ok(PatchResult {
            patch: serde_json::to_vec(&patch).map_err(PatchError::encode("patch"))?,
            current: serde_json::to_vec(&current).map_err(PatchError::encode("current resource"))?,
            modified,
            original,
        })
    }
}

fn as_map(bytes: &[u8], what: &'static str) -> Result<Map<String, Json>, PatchError> {
    match serde_json::from_slice(bytes).map_err(PatchError::encode(what))? {
        Json::Object(map) => Ok(map),
        _ => Err(PatchError::NotAnObject(what)),
    }
}
