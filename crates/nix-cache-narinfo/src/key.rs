//! Object key classification.

use serde::{Deserialize, Serialize};

use crate::NARINFO_SUFFIX;

/// Kind of object stored in a binary cache, derived from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// `<hash>.narinfo` record describing one store path
    Metadata,
    /// NAR payload, log, listing or anything else without embedded metadata
    Content,
}

impl ObjectKind {
    /// Classify an object key.
    pub fn of_key(key: &str) -> Self {
        if key.ends_with(NARINFO_SUFFIX) {
            ObjectKind::Metadata
        } else {
            ObjectKind::Content
        }
    }

    /// True for narinfo records.
    pub fn is_metadata(self) -> bool {
        matches!(self, ObjectKind::Metadata)
    }
}
