//! Retention policy
//!
//! Rules, first match wins:
//! 1. Older than the retention window: drop ("expired")
//! 2. Narinfo without a signature from a trusted key, when trusted keys are
//!    configured: drop ("no accepted key")
//! 3. Keep
//!
//! Content objects carry no signatures; only the age rule applies to them
//! directly. They are otherwise removed by cascading from their narinfo.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use nix_cache_narinfo::{NarInfo, ObjectKind, PublicKey, SignatureError};
use nix_cache_store::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Why an object is dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// Last modified before the retention window
    Expired { last_modified: DateTime<Utc> },
    /// None of the signatures is from a trusted key
    NoAcceptedKey { keys: Vec<String> },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Expired { .. } => f.write_str("expired"),
            DropReason::NoAcceptedKey { .. } => f.write_str("no accepted key"),
        }
    }
}

/// Keep-or-drop verdict for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Drop(DropReason),
}

impl Decision {
    /// True for drop decisions.
    pub fn is_drop(&self) -> bool {
        matches!(self, Decision::Drop(_))
    }

    /// Reason text; empty for keep.
    pub fn reason(&self) -> String {
        match self {
            Decision::Keep => String::new(),
            Decision::Drop(reason) => reason.to_string(),
        }
    }
}

/// An operator-trusted signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedKey {
    /// Any signature with this key name is accepted
    Name(String),
    /// Signatures with this key's name must also verify
    Key(PublicKey),
}

impl TrustedKey {
    /// Key name signatures are matched against.
    pub fn name(&self) -> &str {
        match self {
            TrustedKey::Name(name) => name,
            TrustedKey::Key(key) => key.name(),
        }
    }

    fn accepts(&self, info: &NarInfo) -> bool {
        match self {
            TrustedKey::Name(name) => info.signatures.iter().any(|s| s.key_name() == name),
            TrustedKey::Key(key) => match info.fingerprint() {
                Some(fp) => info.signatures.iter().any(|s| key.verify(&fp, s)),
                None => false,
            },
        }
    }
}

impl FromStr for TrustedKey {
    type Err = SignatureError;

    /// `name` for a name-only entry, `name:base64key` for a verifying one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Ok(TrustedKey::Key(s.parse()?))
        } else {
            Ok(TrustedKey::Name(s.to_string()))
        }
    }
}

/// Age and trust based retention.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    retention: Duration,
    trusted: Vec<TrustedKey>,
}

impl RetentionPolicy {
    /// Keep objects for `days` days; trust checks disabled.
    pub fn keep_days(days: u32) -> Self {
        Self {
            retention: Duration::days(i64::from(days)),
            trusted: Vec::new(),
        }
    }

    /// Enable the trust rule with these keys. An empty list disables it.
    pub fn with_trusted_keys(mut self, trusted: Vec<TrustedKey>) -> Self {
        self.trusted = trusted;
        self
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Whether the trust rule is active.
    pub fn trust_enabled(&self) -> bool {
        !self.trusted.is_empty()
    }

    /// Trusted key names.
    pub fn trusted_names(&self) -> Vec<&str> {
        self.trusted.iter().map(TrustedKey::name).collect()
    }

    /// Age rule alone.
    pub fn check_age(&self, meta: &ObjectMeta, now: DateTime<Utc>) -> Option<DropReason> {
        (now - meta.last_modified > self.retention).then(|| DropReason::Expired {
            last_modified: meta.last_modified,
        })
    }

    /// Trust rule alone. `None` when disabled or when a trusted key accepts.
    pub fn check_trust(&self, info: &NarInfo) -> Option<DropReason> {
        if !self.trust_enabled() || self.trusted.iter().any(|k| k.accepts(info)) {
            return None;
        }

        Some(DropReason::NoAcceptedKey {
            keys: info.key_names().into_iter().map(str::to_string).collect(),
        })
    }

    /// Full decision for one object.
    ///
    /// `narinfo` is the parsed body of a metadata object. A metadata object
    /// without one can only be judged on age.
    pub fn evaluate(&self, meta: &ObjectMeta, narinfo: Option<&NarInfo>, now: DateTime<Utc>) -> Decision {
        if let Some(reason) = self.check_age(meta, now) {
            return Decision::Drop(reason);
        }

        if ObjectKind::of_key(&meta.key).is_metadata() {
            if let Some(reason) = narinfo.and_then(|info| self.check_trust(info)) {
                return Decision::Drop(reason);
            }
        }

        Decision::Keep
    }
}
