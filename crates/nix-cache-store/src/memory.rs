//! In-memory object store
//!
//! Ordered by key like S3 listings. Records every operation and supports
//! per-key failure injection so collector error paths can be exercised
//! without a bucket.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::{ListPage, ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Default page size, matching S3's `MaxKeys` default.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Record of a store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Page fetch, with the continuation token used
    List { continuation: Option<String> },
    /// Body read
    Get { key: String },
    /// Delete attempt (recorded even when it fails)
    Delete { key: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Failures {
    get: HashSet<String>,
    delete: HashSet<String>,
    list_remaining: u32,
}

/// In-memory bucket.
#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    ops: Mutex<Vec<StoreOp>>,
    failures: Mutex<Failures>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create an empty store with the default page size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store returning at most `page_size` objects per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            ops: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
            page_size: page_size.max(1),
        }
    }

    /// Insert or replace an object.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        lock(&self.objects).insert(
            key.into(),
            StoredObject {
                body: body.into(),
                last_modified,
            },
        );
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains_key(key)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// True when the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, in order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Recorded operations, oldest first.
    pub fn operations(&self) -> Vec<StoreOp> {
        lock(&self.ops).clone()
    }

    /// Keys passed to `delete`, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Delete { key } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Make every `get` of `key` fail.
    pub fn fail_get(&self, key: impl Into<String>) {
        lock(&self.failures).get.insert(key.into());
    }

    /// Make every `delete` of `key` fail.
    pub fn fail_delete(&self, key: impl Into<String>) {
        lock(&self.failures).delete.insert(key.into());
    }

    /// Make the next `count` page fetches fail.
    pub fn fail_next_lists(&self, count: u32) {
        lock(&self.failures).list_remaining = count;
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        *lock(&self.failures) = Failures::default();
    }

    fn record(&self, op: StoreOp) {
        lock(&self.ops).push(op);
    }
}

impl ObjectStore for MemoryStore {
    fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        self.record(StoreOp::List {
            continuation: continuation.map(str::to_string),
        });

        {
            let mut failures = lock(&self.failures);
            if failures.list_remaining > 0 {
                failures.list_remaining -= 1;
                return Err(StoreError::Listing("injected failure".to_string()));
            }
        }

        let objects = lock(&self.objects);
        let start = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };

        let mut range = objects.range((start, Bound::Unbounded));
        let page: Vec<ObjectMeta> = range
            .by_ref()
            .take(self.page_size)
            .map(|(key, obj)| ObjectMeta::new(key.clone(), obj.last_modified, obj.body.len() as u64))
            .collect();

        let next = match (range.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok(ListPage { objects: page, next })
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.record(StoreOp::Get { key: key.to_string() });

        if lock(&self.failures).get.contains(key) {
            return Err(StoreError::Access {
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }

        lock(&self.objects)
            .get(key)
            .map(|obj| obj.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.record(StoreOp::Delete { key: key.to_string() });

        if lock(&self.failures).delete.contains(key) {
            return Err(StoreError::Access {
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }

        lock(&self.objects).remove(key);
        Ok(())
    }
}
