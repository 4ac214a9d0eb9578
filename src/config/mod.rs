//! Configuration for the publish and gc subcommands
//!
//! Every option is a long flag with an environment fallback. Raw values are
//! validated into [`PublishConfig`] / [`GcConfig`] before any work starts; a
//! [`ConfigError`] ends the process with exit code 2.

use std::path::PathBuf;

use clap::Args;
use nix_cache_narinfo::SignatureError;
use thiserror::Error;

use crate::gc::{RetentionPolicy, TrustedKey};
use crate::refs::RefFilter;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("at least one of TARGET_PACKAGE or TARGET_PACKAGES must name a package")]
    NoPackages,

    #[error("invalid REF_REGEX {pattern:?}: {source}")]
    InvalidRefRegex {
        pattern: String,
        #[source]
        source: regex_lite::Error,
    },

    #[error("NIX_CACHE_RETENTION_DAYS must be a non-negative integer, got {0:?}")]
    InvalidRetention(String),

    #[error("invalid entry {entry:?} in NIX_CACHE_PUBLIC_KEY_NAMES: {source}")]
    InvalidTrustedKey {
        entry: String,
        #[source]
        source: SignatureError,
    },
}

/// Raw publish options
#[derive(Debug, Clone, Default, Args)]
pub struct PublishArgs {
    /// Repository to clone
    #[arg(long, env = "REPO_URL")]
    pub repo_url: Option<String>,

    /// Package to build for every ref
    #[arg(long, env = "TARGET_PACKAGE")]
    pub target_package: Option<String>,

    /// Packages to build for every ref (space or comma separated)
    #[arg(long, env = "TARGET_PACKAGES")]
    pub target_packages: Option<String>,

    /// Directory holding the last published target per ref
    #[arg(long, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Key file used to sign build closures
    #[arg(long, env = "NIX_CACHE_PRIVATE_KEY_FILE")]
    pub private_key_file: Option<PathBuf>,

    /// Binary cache to copy build outputs to
    #[arg(long, env = "NIX_CACHE_UPLOAD_URI")]
    pub upload_uri: Option<String>,

    /// Only process refs whose full name matches this pattern
    #[arg(long, env = "REF_REGEX")]
    pub ref_regex: Option<String>,

    /// Write a JSON run summary here
    #[arg(long = "summary", env = "NIX_CACHE_SUMMARY_PATH")]
    pub summary_path: Option<PathBuf>,
}

/// Validated publish configuration
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub repo_url: String,
    pub packages: Vec<String>,
    pub state_dir: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
    pub upload_uri: Option<String>,
    pub ref_filter: RefFilter,
    pub summary_path: Option<PathBuf>,
}

impl PublishArgs {
    /// Validate into a [`PublishConfig`].
    pub fn resolve(self) -> Result<PublishConfig, ConfigError> {
        let repo_url = non_empty(self.repo_url).ok_or(ConfigError::Missing("REPO_URL"))?;

        let packages = union_packages(&[self.target_package.as_deref(), self.target_packages.as_deref()]);
        if packages.is_empty() {
            return Err(ConfigError::NoPackages);
        }

        let ref_regex = non_empty(self.ref_regex);
        let ref_filter = RefFilter::new(ref_regex.as_deref()).map_err(|source| ConfigError::InvalidRefRegex {
            pattern: ref_regex.clone().unwrap_or_default(),
            source,
        })?;

        Ok(PublishConfig {
            repo_url,
            packages,
            state_dir: non_empty_path(self.state_dir),
            private_key_file: non_empty_path(self.private_key_file),
            upload_uri: non_empty(self.upload_uri),
            ref_filter,
            summary_path: non_empty_path(self.summary_path),
        })
    }
}

/// Raw gc options
#[derive(Debug, Clone, Default, Args)]
pub struct GcArgs {
    /// Bucket holding the binary cache
    #[arg(long, env = "NIX_CACHE_S3_BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Custom S3 endpoint
    #[arg(long, env = "NIX_CACHE_S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Objects older than this many days are dropped
    #[arg(long, env = "NIX_CACHE_RETENTION_DAYS")]
    pub retention_days: Option<String>,

    /// Space separated trusted key names or `name:base64key` public keys
    #[arg(long, env = "NIX_CACHE_PUBLIC_KEY_NAMES")]
    pub public_key_names: Option<String>,

    /// Log decisions without deleting anything
    #[arg(long, env = "NIX_CACHE_GC_DRY_RUN")]
    pub dry_run: bool,

    /// Write a JSON run summary here
    #[arg(long = "summary", env = "NIX_CACHE_SUMMARY_PATH")]
    pub summary_path: Option<PathBuf>,
}

/// Validated gc configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub policy: RetentionPolicy,
    pub dry_run: bool,
    pub summary_path: Option<PathBuf>,
}

impl GcArgs {
    /// Validate into a [`GcConfig`].
    pub fn resolve(self) -> Result<GcConfig, ConfigError> {
        let bucket = non_empty(self.bucket).ok_or(ConfigError::Missing("NIX_CACHE_S3_BUCKET_NAME"))?;

        let raw_days = non_empty(self.retention_days).ok_or(ConfigError::Missing("NIX_CACHE_RETENTION_DAYS"))?;
        let days: u32 = raw_days
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRetention(raw_days.clone()))?;

        let trusted = parse_trusted_keys(self.public_key_names.as_deref().unwrap_or_default())?;

        Ok(GcConfig {
            bucket,
            endpoint: non_empty(self.endpoint),
            policy: RetentionPolicy::keep_days(days).with_trusted_keys(trusted),
            dry_run: self.dry_run,
            summary_path: non_empty_path(self.summary_path),
        })
    }
}

/// Split package lists on spaces and commas, keeping first occurrences.
pub fn union_packages(sources: &[Option<&str>]) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for name in sources
        .iter()
        .flatten()
        .flat_map(|s| s.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|s| !s.is_empty())
    {
        if !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    }
    packages
}

/// Parse a space separated trusted key list.
pub fn parse_trusted_keys(raw: &str) -> Result<Vec<TrustedKey>, ConfigError> {
    raw.split_whitespace()
        .map(|entry| {
            entry.parse().map_err(|source| ConfigError::InvalidTrustedKey {
                entry: entry.to_string(),
                source,
            })
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}
