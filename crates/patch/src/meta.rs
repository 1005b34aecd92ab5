//! Merge-key tables for strategic diffs.
//!
//! Paths are dotted field names from the document root with list positions
//! dropped, e.g. `spec.template.spec.containers.env`.

#[derive(Debug)]
pub struct PatchMeta {
    keys: &'static [(&'static str, &'static str)],
}

impl PatchMeta {
    pub const fn new(keys: &'static [(&'static str, &'static str)]) -> Self {
        Self { keys }
    }

    pub fn merge_key(&self, path: &str) -> Option<&'static str> {
        self.keys.iter().find(|(p, _)| *p == path).map(|(_, k)| *k)
    }
}

/// Lists without a merge key: merge patches compare them atomically.
pub static NONE: PatchMeta = PatchMeta::new(&[]);

pub static SERVICE: PatchMeta = PatchMeta::new(&[
    ("metadata.ownerReferences", "uid"),
    ("spec.ports", "port"),
]);

pub static DEPLOYMENT: PatchMeta = PatchMeta::new(&[
    ("metadata.ownerReferences", "uid"),
    ("spec.template.metadata.ownerReferences", "uid"),
    ("spec.template.spec.containers", "name"),
    ("spec.template.spec.containers.env", "name"),
    ("spec.template.spec.containers.ports", "containerPort"),
    ("spec.template.spec.containers.volumeMounts", "mountPath"),
    ("spec.template.spec.containers.volumeDevices", "devicePath"),
    ("spec.template.spec.initContainers", "name"),
    ("spec.template.spec.initContainers.env", "name"),
    ("spec.template.spec.initContainers.ports", "containerPort"),
    ("spec.template.spec.initContainers.volumeMounts", "mountPath"),
    ("spec.template.spec.volumes", "name"),
    ("spec.template.spec.imagePullSecrets", "name"),
    ("spec.template.spec.hostAliases", "ip"),
    ("status.conditions", "type"),
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_exact_path_match() {
        assert_eq!(DEPLOYMENT.merge_key("spec.template.spec.containers"), Some("name"));
        assert_eq!(DEPLOYMENT.merge_key("spec.template.spec.containers.ports"), Some("containerPort"));
        assert_eq!(DEPLOYMENT.merge_key("spec.template.spec"), None);
        assert_eq!(SERVICE.merge_key("spec.ports"), Some("port"));
        assert_eq!(NONE.merge_key("spec.ports"), None);
    }
}
