//! Engine configuration passed explicitly into the controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ANNOTATION_KEY: &str = "workload.dmall.com/last-applied";

/// Namespaces whose objects the event source forwards to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePolicy {
    allowed: Vec<String>,
}

impl NamespacePolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { allowed: allowed.into_iter().map(Into::into).collect() }
    }

    /// Empty allow-list admits every namespace.
    pub fn any() -> Self {
        Self { allowed: Vec::new() }
    }

    /// Parse a comma separated list, ignoring blanks.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn admits(&self, namespace: Option<&str>) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        match namespace {
            Some(ns) => self.allowed.iter().any(|a| a == ns),
            None => false,
        }
    }
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::new(["default", "dmall-inner", "dmall-outer"])
    }
}

/// Label keys stamped on managed resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKeys {
    pub app: String,
    pub release: String,
    pub ldc: String,
    pub group: String,
    pub domain: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            app: "app".into(),
            release: "release".into(),
            ldc: "sym-ldc".into(),
            group: "sym-group".into(),
            domain: "lightningDomain0".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub namespaces: NamespacePolicy,
    pub labels: LabelKeys,
    /// Fixed resync interval returned after every cycle.
    pub requeue_after: Duration,
    /// Deadline applied to each individual store call.
    pub store_timeout: Duration,
    /// Container port the endpoint Service targets.
    pub service_port: i32,
    /// Used to derive `<name>.<suffix>` when the object has no explicit domain.
    pub domain_suffix: String,
    pub annotation_key: String,
    /// Max concurrent reconciles in the runner.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespaces: NamespacePolicy::default(),
            labels: LabelKeys::default(),
            requeue_after: Duration::from_secs(20),
            store_timeout: Duration::from_secs(10),
            service_port: 8080,
            domain_suffix: "dmall.com".into(),
            annotation_key: DEFAULT_ANNOTATION_KEY.into(),
            workers: 4,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

impl EngineConfig {
    /// Defaults overridden by `KEEL_*` environment variables; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ns) = std::env::var("KEEL_NAMESPACES") {
            cfg.namespaces = NamespacePolicy::parse(&ns);
        }
        if let Some(secs) = env_parse::<u64>("KEEL_REQUEUE_SECS") {
            cfg.requeue_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("KEEL_STORE_TIMEOUT_SECS") {
            cfg.store_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(port) = env_parse::<i32>("KEEL_SERVICE_PORT") {
            cfg.service_port = port;
        }
        if let Ok(suffix) = std::env::var("KEEL_DOMAIN_SUFFIX") {
            cfg.domain_suffix = suffix;
        }
        if let Some(w) = env_parse::<usize>("KEEL_WORKERS") {
            cfg.workers = w.max(1);
        }
        cfg
    }
}
