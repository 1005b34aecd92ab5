//! Reading YAML manifests given on the command line.

use anyhow::{anyhow, Context, Result};
use keel_core::ObjectKey;
use kube::core::GroupVersionKind;
use serde_json::Value as Json;

/// Upper bounds on what a single manifest may contain.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub bytes: usize,
    pub nodes: usize,
}

impl Limits {
    /// `KEEL_MAX_YAML_BYTES` (default 1 MiB) and `KEEL_MAX_YAML_NODES` (default 100k).
    pub fn from_env() -> Self {
        let read = |name: &str, default: usize| std::env::var(name).ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(default);
        Self { bytes: read("KEEL_MAX_YAML_BYTES", 1_000_000), nodes: read("KEEL_MAX_YAML_NODES", 100_000) }
    }
}

/// A manifest resolved to its kind and identity.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub json: Json,
    pub gvk: GroupVersionKind,
    pub key: ObjectKey,
}

pub fn read(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path))
}

/// Decode YAML into JSON, refusing oversized or overly complex payloads.
pub fn to_json(yaml: &str, limits: Limits) -> Result<Json> {
    if yaml.len() > limits.bytes {
        return Err(anyhow!("YAML payload too large (>{} bytes)", limits.bytes));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(yaml).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    if node_budget_exceeded(&json, limits.nodes) {
        return Err(anyhow!("YAML document too complex (>{} nodes)", limits.nodes));
    }
    Ok(json)
}

/// Parse a manifest; `namespace` fills in (or overrides) `metadata.namespace`.
pub fn parse(yaml: &str, namespace: Option<&str>, limits: Limits) -> Result<Manifest> {
    let mut json = to_json(yaml, limits)?;
    let api_version = json.get("apiVersion").and_then(Json::as_str).ok_or_else(|| anyhow!("YAML missing apiVersion"))?;
    let kind = json.get("kind").and_then(Json::as_str).ok_or_else(|| anyhow!("YAML missing kind"))?;
    let gvk = match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    };
    let name = json.pointer("/metadata/name").and_then(Json::as_str).ok_or_else(|| anyhow!("YAML missing metadata.name"))?.to_string();
    let ns = namespace.map(str::to_string).or_else(|| json.pointer("/metadata/namespace").and_then(Json::as_str).map(str::to_string));
    if let (Some(ns), Some(meta)) = (&ns, json.get_mut("metadata").and_then(Json::as_object_mut)) {
        meta.insert("namespace".into(), Json::String(ns.clone()));
    }
    Ok(Manifest { key: ObjectKey::new(ns.as_deref(), &name), gvk, json })
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => map.values().for_each(|vv| walk(vv, cur, max)),
            Json::Array(arr) => arr.iter().for_each(|vv| walk(vv, cur, max)),
            _ => {}
        }
    }
    let mut cur = 0usize;
    walk(v, &mut cur, max);
    cur > max
}
