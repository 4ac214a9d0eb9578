//! Lazy, page-by-page bucket listing
//!
//! Only one page is buffered at a time. A failed page fetch is retried a
//! bounded number of times; if it keeps failing the iterator yields the error
//! once and then ends, because there is no token to resume from.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::{ObjectMeta, ObjectStore, StoreError};

/// Retry settings for page fetches.
#[derive(Debug, Clone)]
pub struct ListingConfig {
    /// Attempts per page, including the first (minimum 1)
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled for each further attempt
    pub backoff: Duration,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl ListingConfig {
    /// Retry without sleeping. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }
}

/// Iterator over every object in a store.
pub struct Listing<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    config: ListingConfig,
    buffer: VecDeque<ObjectMeta>,
    next: Option<String>,
    pages: usize,
    finished: bool,
}

impl<'a, S: ObjectStore + ?Sized> Listing<'a, S> {
    /// Start a listing from the beginning of the bucket.
    pub fn new(store: &'a S, config: ListingConfig) -> Self {
        Self {
            store,
            config,
            buffer: VecDeque::new(),
            next: None,
            pages: 0,
            finished: false,
        }
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    fn fetch_page(&mut self) -> Result<(), StoreError> {
        let attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.backoff;
        let mut attempt = 1;

        loop {
            match self.store.list_page(self.next.as_deref()) {
                Ok(page) => {
                    self.pages += 1;
                    self.buffer.extend(page.objects);
                    self.finished = page.next.is_none();
                    self.next = page.next;
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Listing page failed, retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                        delay *= 2;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: ObjectStore + ?Sized> Iterator for Listing<'_, S> {
    type Item = Result<ObjectMeta, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(obj) = self.buffer.pop_front() {
                return Some(Ok(obj));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}
