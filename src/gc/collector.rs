//! Bucket garbage collector
//!
//! Streams the bucket listing and applies the retention policy to each
//! object. Dropping a narinfo also deletes the NAR it points at; the two
//! deletes are independent and a failure of one never blocks the other.
//!
//! Store access failures are per object: logged with the key, counted, and
//! the object is left for the next run.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use nix_cache_narinfo::{NarInfo, NarInfoError, ObjectKind};
use nix_cache_store::{Listing, ListingConfig, ObjectMeta, ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::policy::{Decision, DropReason, RetentionPolicy};
use crate::signal::SignalState;

/// Default progress cadence, in objects.
pub const DEFAULT_PROGRESS_EVERY: usize = 100;

/// Collector settings
#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Log decisions but delete nothing
    pub dry_run: bool,
    /// Emit progress every this many objects
    pub progress_every: usize,
    /// Retry settings for listing pages
    pub listing: ListingConfig,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            progress_every: DEFAULT_PROGRESS_EVERY,
            listing: ListingConfig::default(),
        }
    }
}

/// Progress checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcProgress {
    pub seen: usize,
    pub dropped: usize,
}

/// A per-object failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcFailure {
    pub key: String,
    pub error: String,
}

/// Counters for a collector run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcReport {
    /// Objects visited
    pub total_seen: usize,
    /// Objects dropped by a policy decision
    pub dropped: usize,
    /// Drops by the age rule
    pub dropped_expired: usize,
    /// Drops by the trust rule
    pub dropped_untrusted: usize,
    /// Content objects deleted through their narinfo. They are skipped if
    /// met again later in the same page and never counted in `dropped`.
    pub cascaded: usize,
    /// Per-object failures
    pub failures: Vec<GcFailure>,
    /// Listing ended early after repeated page failures
    pub listing_failed: bool,
    /// Run stopped early on operator interrupt
    pub interrupted: bool,
    /// Nothing was actually deleted
    pub dry_run: bool,
}

impl GcReport {
    /// Number of avoidable errors (object failures plus a failed listing).
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    fn fail(&mut self, key: &str, error: impl ToString) {
        self.failures.push(GcFailure {
            key: key.to_string(),
            error: error.to_string(),
        });
    }
}

/// Failure to load a narinfo body
#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed narinfo: {0}")]
    Parse(#[from] NarInfoError),
}

/// Runs the retention policy over a store.
pub struct Collector<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    policy: &'a RetentionPolicy,
    options: GcOptions,
}

impl<'a, S: ObjectStore + ?Sized> Collector<'a, S> {
    /// Create a collector.
    pub fn new(store: &'a S, policy: &'a RetentionPolicy, options: GcOptions) -> Self {
        Self {
            store,
            policy,
            options,
        }
    }

    /// Visit every object, logging progress.
    pub fn run(&self, now: DateTime<Utc>, signals: &SignalState) -> GcReport {
        self.run_with_progress(now, signals, |_| {})
    }

    /// Visit every object, calling `on_progress` at each checkpoint.
    pub fn run_with_progress<F>(&self, now: DateTime<Utc>, signals: &SignalState, mut on_progress: F) -> GcReport
    where
        F: FnMut(GcProgress),
    {
        let mut report = GcReport {
            dry_run: self.options.dry_run,
            ..GcReport::default()
        };

        if !self.policy.trust_enabled() {
            warn!("Not checking public keys as NIX_CACHE_PUBLIC_KEY_NAMES is not set");
        }

        let every = self.options.progress_every.max(1);
        let mut listing = Listing::new(self.store, self.options.listing.clone());
        let mut page = 0;
        // Content deleted through its narinfo that may still show up in the
        // buffered page. Pages fetched later no longer list it.
        let mut cascaded_keys: HashSet<String> = HashSet::new();

        while let Some(item) = listing.next() {
            if signals.is_cancel_requested() {
                report.interrupted = true;
                break;
            }

            let meta = match item {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(error = %e, "Listing failed; ending scan early");
                    report.listing_failed = true;
                    report.fail("<listing>", e);
                    break;
                }
            };

            if listing.pages_fetched() != page {
                page = listing.pages_fetched();
                if !self.options.dry_run {
                    cascaded_keys.clear();
                }
            }

            report.total_seen += 1;
            if !cascaded_keys.remove(&meta.key) {
                self.handle(&meta, now, &mut report, &mut cascaded_keys);
            }

            if report.total_seen % every == 0 {
                info!("Handled {} objects", report.total_seen);
                on_progress(GcProgress {
                    seen: report.total_seen,
                    dropped: report.dropped,
                });
            }
        }

        // A signal during the last object or page fetch still has to fail the run.
        report.interrupted |= signals.is_cancel_requested();

        info!("Done.");
        info!(
            dropped = report.dropped,
            cascaded = report.cascaded,
            errors = report.error_count(),
            "Handled {} objects",
            report.total_seen
        );

        report
    }

    fn handle(&self, meta: &ObjectMeta, now: DateTime<Utc>, report: &mut GcReport, cascaded_keys: &mut HashSet<String>) {
        let is_metadata = ObjectKind::of_key(&meta.key).is_metadata();
        let expired = self.policy.check_age(meta, now).is_some();

        let narinfo = if is_metadata && (expired || self.policy.trust_enabled()) {
            match self.load(&meta.key) {
                Ok(info) => Some(info),
                Err(LoadError::Parse(e)) if expired => {
                    warn!(key = %meta.key, error = %e, "Expired narinfo is malformed; its content cannot be cascaded");
                    report.fail(&meta.key, e);
                    None
                }
                Err(LoadError::Parse(e)) => {
                    warn!(key = %meta.key, error = %e, "Skipping malformed narinfo");
                    report.fail(&meta.key, e);
                    return;
                }
                Err(LoadError::Store(e)) => {
                    warn!(error = %e, "Could not access {}. Skipping.", meta.key);
                    report.fail(&meta.key, e);
                    return;
                }
            }
        } else {
            None
        };

        let reason = match self.policy.evaluate(meta, narinfo.as_ref(), now) {
            Decision::Keep => return,
            Decision::Drop(reason) => reason,
        };

        let description = narinfo
            .as_ref()
            .map_or(meta.key.as_str(), |info| info.store_path.as_str());
        match &reason {
            DropReason::Expired { last_modified } => info!(
                "Dropping {}. Reason: Older than retention time. Last modified {}",
                description, last_modified
            ),
            DropReason::NoAcceptedKey { keys } => {
                info!("Dropping {}. Reason: No accepted key. Keys: {:?}", description, keys)
            }
        }

        self.drop_object(meta, narinfo.as_ref(), &reason, report, cascaded_keys);
    }

    fn load(&self, key: &str) -> Result<NarInfo, LoadError> {
        let body = self.store.get(key)?;
        Ok(NarInfo::parse(&body)?)
    }

    /// Delete an object and, for a narinfo, the content it references.
    fn drop_object(
        &self,
        meta: &ObjectMeta,
        narinfo: Option<&NarInfo>,
        reason: &DropReason,
        report: &mut GcReport,
        cascaded_keys: &mut HashSet<String>,
    ) {
        if self.options.dry_run {
            if let Some(info) = narinfo {
                info!("Dry run: would delete {} and {}", meta.key, info.url);
                report.cascaded += 1;
                cascaded_keys.insert(info.url.clone());
            } else {
                info!("Dry run: would delete {}", meta.key);
            }
            count_drop(report, reason);
            return;
        }

        if let Some(info) = narinfo {
            match self.store.delete(&info.url) {
                Ok(()) => {
                    report.cascaded += 1;
                    cascaded_keys.insert(info.url.clone());
                }
                Err(e) => {
                    warn!(error = %e, "Could not delete {} referenced by {}", info.url, meta.key);
                    report.fail(&info.url, e);
                }
            }
        }

        match self.store.delete(&meta.key) {
            Ok(()) => count_drop(report, reason),
            Err(e) => {
                warn!(error = %e, "Could not delete {}. Skipping.", meta.key);
                report.fail(&meta.key, e);
            }
        }
    }
}

fn count_drop(report: &mut GcReport, reason: &DropReason) {
    report.dropped += 1;
    match reason {
        DropReason::Expired { .. } => report.dropped_expired += 1,
        DropReason::NoAcceptedKey { .. } => report.dropped_untrusted += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nix_cache_store::MemoryStore;

    use crate::gc::TrustedKey;

    fn narinfo_body(hash: &str, sig: Option<&str>) -> String {
        let mut body = format!(
            "StorePath: /nix/store/{hash}-hello\nURL: nar/{hash}.nar.xz\nCompression: xz\n"
        );
        if let Some(sig) = sig {
            body.push_str(&format!("Sig: {}\n", sig));
        }
        body
    }

    fn options() -> GcOptions {
        GcOptions {
            listing: ListingConfig::immediate(1),
            ..GcOptions::default()
        }
    }

    #[test]
    fn test_expired_narinfo_cascades() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("aaa.narinfo", narinfo_body("aaa", Some("k:s")), now - Duration::days(40));
        store.insert("nar/aaa.nar.xz", b"nar".to_vec(), now - Duration::days(40));

        let policy = RetentionPolicy::keep_days(30);
        let report = Collector::new(&store, &policy, options()).run(now, &SignalState::new());

        assert!(store.is_empty());
        assert_eq!(report.total_seen, 2);
        assert_eq!(report.cascaded, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_content_delete_failure_does_not_block_metadata() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("aaa.narinfo", narinfo_body("aaa", None), now - Duration::days(40));
        store.insert("nar/aaa.nar.xz", b"nar".to_vec(), now);
        store.fail_delete("nar/aaa.nar.xz");

        let policy = RetentionPolicy::keep_days(30);
        let report = Collector::new(&store, &policy, options()).run(now, &SignalState::new());

        assert!(!store.contains("aaa.narinfo"));
        assert!(store.contains("nar/aaa.nar.xz"));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.failures[0].key, "nar/aaa.nar.xz");
    }

    #[test]
    fn test_unreadable_narinfo_is_skipped() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("aaa.narinfo", narinfo_body("aaa", None), now);
        store.insert("bbb.narinfo", narinfo_body("bbb", None), now);
        store.fail_get("aaa.narinfo");

        let policy = RetentionPolicy::keep_days(30).with_trusted_keys(vec![TrustedKey::Name("k".to_string())]);
        let report = Collector::new(&store, &policy, options()).run(now, &SignalState::new());

        assert!(store.contains("aaa.narinfo"));
        assert!(!store.contains("bbb.narinfo"));
        assert_eq!(report.total_seen, 2);
        assert_eq!(report.dropped_untrusted, 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_malformed_expired_narinfo_is_still_deleted() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("bad.narinfo", b"not a narinfo".to_vec(), now - Duration::days(40));

        let policy = RetentionPolicy::keep_days(30);
        let report = Collector::new(&store, &policy, options()).run(now, &SignalState::new());

        assert!(store.is_empty());
        assert_eq!(report.dropped, 1);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_malformed_fresh_narinfo_is_kept() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("bad.narinfo", b"garbage".to_vec(), now);

        let policy = RetentionPolicy::keep_days(30).with_trusted_keys(vec![TrustedKey::Name("k".to_string())]);
        let report = Collector::new(&store, &policy, options()).run(now, &SignalState::new());

        assert!(store.contains("bad.narinfo"));
        assert_eq!(report.dropped, 0);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("aaa.narinfo", narinfo_body("aaa", None), now - Duration::days(40));
        store.insert("nar/aaa.nar.xz", b"nar".to_vec(), now - Duration::days(40));

        let policy = RetentionPolicy::keep_days(30);
        let opts = GcOptions {
            dry_run: true,
            ..options()
        };
        let report = Collector::new(&store, &policy, opts).run(now, &SignalState::new());

        assert_eq!(store.len(), 2);
        assert!(store.deleted_keys().is_empty());
        assert_eq!(report.dropped, 1);
        assert_eq!(report.cascaded, 1);
        assert!(report.dry_run);
    }

    #[test]
    fn test_listing_failure_is_counted() {
        let store = MemoryStore::new();
        store.insert("nar/x.nar", b"x".to_vec(), Utc::now());
        store.fail_next_lists(5);

        let policy = RetentionPolicy::keep_days(30);
        let report = Collector::new(&store, &policy, options()).run(Utc::now(), &SignalState::new());

        assert!(report.listing_failed);
        assert_eq!(report.total_seen, 0);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_interrupt_stops_scan() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.insert("nar/x.nar", b"x".to_vec(), now - Duration::days(40));
        let signals = SignalState::new();
        signals.handle_signal();

        let policy = RetentionPolicy::keep_days(30);
        let report = Collector::new(&store, &policy, options()).run(now, &signals);

        assert!(report.interrupted);
        assert!(store.contains("nar/x.nar"));
    }
}
