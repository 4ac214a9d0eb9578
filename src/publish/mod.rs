//! Incremental publisher
//!
//! For every ref and every configured package:
//! 1. Skip if the state store already records this ref's target
//! 2. Build, then sign the closure and copy it to the cache (each optional)
//! 3. Record the target once every configured step succeeded
//!
//! A failing unit is logged, counted and left unrecorded so the next run
//! retries it. Nothing a unit does can abort the batch; only an operator
//! interrupt stops the loop early.

mod report;

pub use report::{PublishReport, UnitFailure, UnitOutcome};

use std::path::PathBuf;

use tracing::{info, info_span, warn};

use crate::refs::Ref;
use crate::signal::SignalState;
use crate::state::{StateError, StateStore};
use crate::toolchain::{Toolchain, ToolchainError};

/// Why a unit failed
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("build failed: {0}")]
    Build(#[source] ToolchainError),

    #[error("signing failed: {0}")]
    Sign(#[source] ToolchainError),

    #[error("upload failed: {0}")]
    Upload(#[source] ToolchainError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("package {0} is not configured")]
    UnknownPackage(String),
}

/// Publisher setup errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no packages configured")]
    NoPackages,

    #[error("package {package:?} cannot be used as a state directory: {source}")]
    PackageScope {
        package: String,
        #[source]
        source: StateError,
    },
}

/// What to publish and where.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Packages to build for every ref, in order
    pub packages: Vec<String>,

    /// Private key file for `nix store sign`; signing is skipped without it
    pub signing_key: Option<PathBuf>,

    /// Destination for `nix copy --to`; upload is skipped without it
    pub upload_uri: Option<String>,
}

/// Per-package state. With one package records live directly under the
/// state root; with several, each package gets its own subdirectory.
struct PackageTarget {
    name: String,
    state: Option<StateStore>,
}

/// Publishes refs through a [`Toolchain`].
pub struct Publisher<'a, T: Toolchain> {
    toolchain: &'a T,
    targets: Vec<PackageTarget>,
    signing_key: Option<PathBuf>,
    upload_uri: Option<String>,
}

impl<'a, T: Toolchain> Publisher<'a, T> {
    /// Create a publisher. `state` of `None` selects stateless mode, where
    /// every ref is rebuilt on every run.
    pub fn new(
        toolchain: &'a T,
        state: Option<StateStore>,
        options: PublishOptions,
    ) -> Result<Self, PublishError> {
        if options.packages.is_empty() {
            return Err(PublishError::NoPackages);
        }

        let scoped = options.packages.len() > 1;
        let targets = options
            .packages
            .into_iter()
            .map(|name| -> Result<PackageTarget, PublishError> {
                let state = match (&state, scoped) {
                    (Some(root), true) => Some(root.scoped(&name).map_err(|source| {
                        PublishError::PackageScope {
                            package: name.clone(),
                            source,
                        }
                    })?),
                    (Some(root), false) => Some(root.clone()),
                    (None, _) => None,
                };
                Ok(PackageTarget { name, state })
            })
            .collect::<Result<Vec<_>, PublishError>>()?;

        Ok(Self {
            toolchain,
            targets,
            signing_key: options.signing_key,
            upload_uri: options.upload_uri,
        })
    }

    /// Whether a state store is configured.
    pub fn is_stateful(&self) -> bool {
        self.targets.iter().any(|t| t.state.is_some())
    }

    /// Publish every ref × package unit.
    ///
    /// Stops before the next unit once an interrupt is requested. The report
    /// is marked interrupted whenever a signal arrived during the run.
    pub fn run(&self, refs: &[Ref], signals: &SignalState) -> PublishReport {
        let mut report = PublishReport::new(refs.len());

        if !self.is_stateful() {
            info!("No state directory configured; every ref will be rebuilt");
        }

        'refs: for r in refs {
            let _span = info_span!("ref", name = %r.name, target = %r.target).entered();

            for target in &self.targets {
                if signals.is_cancel_requested() {
                    report.interrupted = true;
                    break 'refs;
                }

                let outcome = self.publish_unit(r, target);
                report.record(r, &target.name, outcome);
            }
        }

        // A signal during the last unit still has to fail the run.
        report.interrupted |= signals.is_cancel_requested();
        report
    }

    /// Publish one ref for one package.
    pub fn publish_one(&self, r: &Ref, package: &str) -> UnitOutcome {
        match self.targets.iter().find(|t| t.name == package) {
            Some(target) => self.publish_unit(r, target),
            None => UnitOutcome::Failed(UnitError::UnknownPackage(package.to_string())),
        }
    }

    fn publish_unit(&self, r: &Ref, target: &PackageTarget) -> UnitOutcome {
        if let Some(ref state) = target.state {
            match state.is_published(&r.name, &r.target) {
                Ok(true) => return UnitOutcome::Skipped,
                Ok(false) => {}
                Err(e) => {
                    warn!(package = %target.name, error = %e, "Could not read state for {}", r.name);
                    return UnitOutcome::Failed(e.into());
                }
            }
        }

        let out_paths = match self.build_and_push(r, &target.name) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(package = %target.name, "{} for {} at {}; will be retried next run", e, r.name, r.target);
                return UnitOutcome::Failed(e);
            }
        };

        if let Some(ref state) = target.state {
            if let Err(e) = state.put(&r.name, &r.target) {
                warn!(package = %target.name, error = %e, "Could not record {} for {}", r.target, r.name);
                return UnitOutcome::Failed(e.into());
            }
        }

        UnitOutcome::Published { out_paths }
    }

    fn build_and_push(&self, r: &Ref, package: &str) -> Result<Vec<String>, UnitError> {
        info!(package, "Building packages for {}...", r.name);
        let output = self
            .toolchain
            .build(&r.target, package)
            .map_err(UnitError::Build)?;
        let paths = output.out_paths;

        match self.signing_key {
            Some(ref key_file) => {
                info!(package, "Signing packages for {}...", r.name);
                self.toolchain
                    .sign(&paths, key_file)
                    .map_err(UnitError::Sign)?;
            }
            None => info!(
                package,
                "Skipping signing for {} because NIX_CACHE_PRIVATE_KEY_FILE is not provided", r.name
            ),
        }

        match self.upload_uri {
            Some(ref uri) => {
                info!(package, uri = %uri, "Uploading packages for {}...", r.name);
                self.toolchain
                    .copy_to(&paths, uri)
                    .map_err(UnitError::Upload)?;
            }
            None => info!(
                package,
                "Skipping upload for {} because NIX_CACHE_UPLOAD_URI is not provided", r.name
            ),
        }

        Ok(paths)
    }
}
