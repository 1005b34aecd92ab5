//! Record of store calls, in the order they were made.

use std::fmt;

use keel_core::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::UpdateStatus => "update_status",
            Verb::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    /// Kind of the addressed resource, e.g. `Service`.
    pub kind: String,
    /// `None` for list calls.
    pub key: Option<ObjectKey>,
    /// Version token the caller sent, for update and update_status.
    pub resource_version: Option<String>,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb, self.kind)?;
        if let Some(key) = &self.key {
            write!(f, " {}", key)?;
        }
        if let Some(rv) = &self.resource_version {
            write!(f, " rv={}", rv)?;
        }
        Ok(())
    }
}
