//! Publisher lifecycle tests
//!
//! Idempotent re-runs, stateless mode, and per-unit failure isolation,
//! driven through the fake toolchain and a real on-disk state directory.

use nix_cache_lane::mock::{FailureConfig, FakeToolchain, StaticRefSource, ToolchainCall, ToolchainOp};
use nix_cache_lane::publish::{PublishOptions, Publisher};
use nix_cache_lane::refs::{Ref, RefFilter, RefSource};
use nix_cache_lane::signal::SignalState;
use nix_cache_lane::summary::ExitCode;
use nix_cache_lane::toolchain::{BuildOutput, Toolchain, ToolchainResult};
use nix_cache_lane::StateStore;
use std::path::Path;
use tempfile::TempDir;

fn options(packages: &[&str]) -> PublishOptions {
    PublishOptions {
        packages: packages.iter().map(|p| p.to_string()).collect(),
        signing_key: Some("/run/keys/cache.sec".into()),
        upload_uri: Some("s3://cache".to_string()),
    }
}

fn repo_refs() -> Vec<Ref> {
    vec![
        Ref::new("refs/heads/main", "1111"),
        Ref::new("refs/heads/staging", "2222"),
        Ref::new("refs/tags/v1.0", "1111"),
    ]
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn test_second_run_builds_nothing() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let signals = SignalState::new();
    let refs = repo_refs();

    let first = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"]))
        .unwrap()
        .run(&refs, &signals);
    assert_eq!(first.error_count(), 0);
    assert_eq!(first.published, 3);
    assert_eq!(toolchain.build_count(), 3);

    toolchain.reset_calls();
    let second = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"]))
        .unwrap()
        .run(&refs, &signals);
    assert_eq!(second.error_count(), 0);
    assert_eq!(second.skipped, 3);
    assert!(toolchain.calls().is_empty(), "second run must not touch the toolchain");
}

#[test]
fn test_state_layout_is_plain_text_per_ref() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();

    Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"]))
        .unwrap()
        .run(&repo_refs(), &SignalState::new());

    let main = std::fs::read_to_string(temp.path().join("refs/heads/main")).unwrap();
    assert_eq!(main.trim(), "1111");
    let tag = std::fs::read_to_string(temp.path().join("refs/tags/v1.0")).unwrap();
    assert_eq!(tag.trim(), "1111");
}

#[test]
fn test_moved_ref_is_rebuilt() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let signals = SignalState::new();
    let source = StaticRefSource::new(repo_refs());

    let publisher = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"])).unwrap();
    publisher.run(&source.refs().unwrap(), &signals);

    source.set(vec![
        Ref::new("refs/heads/main", "3333"),
        Ref::new("refs/heads/staging", "2222"),
        Ref::new("refs/tags/v1.0", "1111"),
    ]);
    toolchain.reset_calls();
    let report = publisher.run(&source.refs().unwrap(), &signals);

    assert_eq!(toolchain.builds(), vec![("3333".to_string(), "hello".to_string())]);
    assert_eq!(report.published, 1);
    assert_eq!(report.skipped, 2);
}

// =============================================================================
// Stateless mode
// =============================================================================

#[test]
fn test_stateless_rebuilds_every_run() {
    let toolchain = FakeToolchain::new();
    let signals = SignalState::new();
    let refs = repo_refs();
    let publisher = Publisher::new(&toolchain, None, options(&["hello"])).unwrap();
    assert!(!publisher.is_stateful());

    publisher.run(&refs, &signals);
    publisher.run(&refs, &signals);

    assert_eq!(toolchain.build_count(), 6);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[test]
fn test_one_package_failing_does_not_block_the_other() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    toolchain.fail(ToolchainOp::Build, "1111", "a", FailureConfig::error("attribute 'a' missing"));

    let root = StateStore::new(temp.path());
    let refs = vec![Ref::new("refs/heads/main", "1111")];
    let report = Publisher::new(&toolchain, Some(root.clone()), options(&["a", "b"]))
        .unwrap()
        .run(&refs, &SignalState::new());

    assert_eq!(report.error_count(), 1);
    assert_eq!(report.failures[0].package, "a");
    assert_eq!(report.published, 1);

    let a = root.scoped("a").unwrap();
    let b = root.scoped("b").unwrap();
    assert!(a.get("refs/heads/main").unwrap().is_none());
    assert_eq!(b.get("refs/heads/main").unwrap().unwrap().last_published_target, "1111");
}

#[test]
fn test_failed_unit_is_retried_next_run() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    toolchain.fail(
        ToolchainOp::Copy,
        "1111",
        "hello",
        FailureConfig::error("connection reset").with_fail_count(1),
    );

    let refs = vec![Ref::new("refs/heads/main", "1111")];
    let publisher = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"])).unwrap();

    let first = publisher.run(&refs, &SignalState::new());
    assert_eq!(first.error_count(), 1);

    toolchain.reset_calls();
    let second = publisher.run(&refs, &SignalState::new());
    assert_eq!(second.error_count(), 0);
    assert_eq!(second.published, 1);
    assert_eq!(toolchain.build_count(), 1, "upload failure leaves the unit unrecorded");
    assert!(matches!(toolchain.calls().last(), Some(ToolchainCall::Copy { .. })));
}

#[test]
fn test_filtered_refs_are_not_built() {
    let toolchain = FakeToolchain::new();
    let filter = RefFilter::new(Some("^refs/tags/")).unwrap();
    let refs = filter.apply(repo_refs());

    let report = Publisher::new(&toolchain, None, options(&["hello"]))
        .unwrap()
        .run(&refs, &SignalState::new());

    assert_eq!(report.refs, 1);
    assert_eq!(toolchain.builds(), vec![("1111".to_string(), "hello".to_string())]);
}

#[test]
fn test_interrupt_leaves_no_partial_records() {
    let temp = TempDir::new().unwrap();
    let toolchain = FakeToolchain::new();
    let signals = SignalState::new();
    signals.handle_signal();

    let report = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"]))
        .unwrap()
        .run(&repo_refs(), &signals);

    assert!(report.interrupted);
    assert!(!report.is_clean());
    assert_eq!(toolchain.build_count(), 0);
    assert!(StateStore::new(temp.path()).get("refs/heads/main").unwrap().is_none());
}

#[test]
fn test_cleared_failure_publishes_on_next_run() {
    let toolchain = FakeToolchain::new();
    toolchain.fail(ToolchainOp::Build, "1111", "hello", FailureConfig::error("flake input unreachable"));
    let refs = vec![Ref::new("refs/heads/main", "1111")];
    let publisher = Publisher::new(&toolchain, None, options(&["hello"])).unwrap();

    assert_eq!(publisher.run(&refs, &SignalState::new()).error_count(), 1);

    toolchain.clear_failures();
    let report = publisher.run(&refs, &SignalState::new());
    assert!(report.is_clean());
    assert_eq!(report.published, 1);
}

// =============================================================================
// Interrupt during the last unit
// =============================================================================

/// Raises an interrupt while a build is running.
struct InterruptingToolchain<'a> {
    inner: FakeToolchain,
    signals: &'a SignalState,
}

impl Toolchain for InterruptingToolchain<'_> {
    fn build(&self, target: &str, package: &str) -> ToolchainResult<BuildOutput> {
        self.signals.handle_signal();
        self.inner.build(target, package)
    }

    fn sign(&self, paths: &[String], key_file: &Path) -> ToolchainResult<()> {
        self.inner.sign(paths, key_file)
    }

    fn copy_to(&self, paths: &[String], uri: &str) -> ToolchainResult<()> {
        self.inner.copy_to(paths, uri)
    }
}

#[test]
fn test_interrupt_during_last_unit_fails_the_run() {
    let temp = TempDir::new().unwrap();
    let signals = SignalState::new();
    let toolchain = InterruptingToolchain {
        inner: FakeToolchain::new(),
        signals: &signals,
    };

    let refs = vec![Ref::new("refs/heads/main", "1111")];
    let report = Publisher::new(&toolchain, Some(StateStore::new(temp.path())), options(&["hello"]))
        .unwrap()
        .run(&refs, &signals);

    assert_eq!(toolchain.inner.build_count(), 1);
    assert_eq!(report.error_count(), 0);
    assert!(report.interrupted);
    assert_eq!(
        ExitCode::for_run(report.error_count(), report.interrupted),
        ExitCode::Interrupted
    );
}
