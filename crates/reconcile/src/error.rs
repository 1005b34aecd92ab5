use keel_core::{ObjectKey, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to {action} {kind} {key}: {source}")]
    Store {
        action: &'static str,
        kind: String,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("{kind} has no metadata.name")]
    MissingName { kind: String },
    #[error("{kind} {key} has no resourceVersion")]
    MissingVersion { kind: String, key: ObjectKey },
    #[error("encoding {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("component {component}: {source}")]
    Component {
        component: &'static str,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub(crate) fn store(action: &'static str, kind: &str, key: &ObjectKey, source: StoreError) -> Self {
        ReconcileError::Store { action, kind: kind.to_string(), key: key.clone(), source }
    }

    pub(crate) fn encode(kind: &str) -> impl FnOnce(serde_json::Error) -> ReconcileError + '_ {
        move |source| ReconcileError::Encode { kind: kind.to_string(), source }
    }

    /// Underlying store failure, looking through component wrapping.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReconcileError::Store { source, .. } => Some(source),
            ReconcileError::Component { source, .. } => source.store_error(),
            _ => None,
        }
    }

    /// Name of the component that failed, if the error came out of the fan-out.
    pub fn component(&self) -> Option<&'static str> {
        match self {
            ReconcileError::Component { component, .. } => Some(component),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_reachable_through_component() {
        let inner = ReconcileError::store("update", "Service", &ObjectKey::namespaced("default", "web"), StoreError::Unavailable("eof".into()));
        assert_eq!(inner.to_string(), "failed to update Service default/web: unavailable: eof");
        let wrapped = ReconcileError::Component { component: "svc", source: Box::new(inner) };
        assert_eq!(wrapped.component(), Some("svc"));
        assert!(matches!(wrapped.store_error(), Some(StoreError::Unavailable(_))));
    }
}
