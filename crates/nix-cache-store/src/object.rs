//! Listing entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a bucket listing. The body is fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key
    pub key: String,

    /// Last modification time reported by the store
    pub last_modified: DateTime<Utc>,

    /// Size in bytes
    #[serde(default)]
    pub size: u64,
}

impl ObjectMeta {
    /// Create listing metadata for a key.
    pub fn new(key: impl Into<String>, last_modified: DateTime<Utc>, size: u64) -> Self {
        Self {
            key: key.into(),
            last_modified,
            size,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page, in store order
    pub objects: Vec<ObjectMeta>,

    /// Token for the next page; `None` on the last page
    pub next: Option<String>,
}
