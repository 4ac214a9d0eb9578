//! Object store access for binary cache buckets.
//!
//! The [`ObjectStore`] trait is the only thing the collector talks to. It is
//! implemented by [`S3CliStore`] for real buckets and by [`MemoryStore`] for
//! tests. [`Listing`] turns the page-at-a-time API into a lazy iterator so a
//! bucket is never held in memory at once.

mod listing;
mod memory;
mod object;
mod s3;

pub use listing::{Listing, ListingConfig};
pub use memory::{MemoryStore, StoreOp};
pub use object::{ListPage, ObjectMeta};
pub use s3::{S3CliStore, S3Config};

/// Object store errors.
///
/// Every variant is treated as a transient per-object failure by callers:
/// the object is skipped and reconsidered on the next run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("access to {key} failed: {message}")]
    Access { key: String, message: String },

    #[error("listing failed: {0}")]
    Listing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal client surface of a bucket.
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of the listing, starting after `continuation`.
    fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage>;

    /// Read an object's body.
    fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Delete an object. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> StoreResult<()>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        (**self).list_page(continuation)
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        (**self).list_page(continuation)
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key)
    }
}
