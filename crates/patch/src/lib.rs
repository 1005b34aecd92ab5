//! Keel patch: last-applied annotation tracking and three-way patch calculation.
//!
//! The last-applied annotation stands in for a version history: it holds the
//! desired configuration as of the previous write and becomes the "original"
//! side of the next three-way diff.

#![forbid(unsafe_code)]

pub mod annotation;
pub mod calculator;
pub mod merge;
pub mod meta;
pub mod normalize;
pub mod strategic;
pub mod summary;

pub use annotation::Annotator;
pub use calculator::{PatchCalculator, PatchResult};
pub use meta::PatchMeta;
pub use normalize::delete_nulls;
pub use summary::{diff_summary, DiffSummary};

/// How a resource kind is diffed.
#[derive(Debug, Clone, Copy)]
pub enum DiffStrategy {
    /// Structural merge; lists registered in the table merge by key.
    Strategic(&'static PatchMeta),
    /// RFC 7396 merge patch; every list replaces wholesale.
    JsonMerge,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("encoding {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} is not a JSON object")]
    NotAnObject(&'static str),
    #[error("annotation value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl PatchError {
    pub(crate) fn encode(what: &'static str) -> impl FnOnce(serde_json::Error) -> PatchError {
        move |source| PatchError::Encode { what, source }
    }
}

pub(crate) const EMPTY_OBJECT: &[u8] = b"{}";
